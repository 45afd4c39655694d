use remote_gateway::{Message, Readable};

/// Number of records not yet read.
pub fn unread_count<R: Readable>(records: &[R]) -> usize {
    records.iter().filter(|r| !r.is_read()).count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the current user.
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversationLine<'a> {
    pub message: &'a Message,
    pub direction: Direction,
    /// The other participant.
    pub peer: &'a str,
}

/// Messages involving `me`, in snapshot order, tagged by direction.
pub fn conversation<'a>(messages: &'a [Message], me: &str) -> Vec<ConversationLine<'a>> {
    messages
        .iter()
        .filter_map(|message| {
            if message.sender_id == me {
                Some(ConversationLine {
                    message,
                    direction: Direction::Outgoing,
                    peer: &message.recipient_id,
                })
            } else if message.recipient_id == me {
                Some(ConversationLine {
                    message,
                    direction: Direction::Incoming,
                    peer: &message.sender_id,
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_gateway::{Notification, Record};
    use serde_json::json;

    fn notification(id: &str, read: bool) -> Notification {
        Notification::from_row(json!({
            "id": id,
            "title": "Build finished",
            "content": "",
            "read": read,
            "created_at": "2024-03-01T10:00:00Z",
        }))
        .unwrap()
    }

    fn message(id: &str, from: &str, to: &str) -> Message {
        Message::from_row(json!({
            "id": id,
            "content": "hi",
            "sender_id": from,
            "recipient_id": to,
            "created_at": "2024-03-01T10:00:00Z",
            "read": false,
        }))
        .unwrap()
    }

    #[test]
    fn counts_unread_records() {
        let rows = vec![
            notification("n1", false),
            notification("n2", true),
            notification("n3", false),
        ];
        assert_eq!(unread_count(&rows), 2);
        assert_eq!(unread_count::<Notification>(&[]), 0);
    }

    #[test]
    fn conversation_tags_direction() {
        let rows = vec![
            message("m1", "me", "ana"),
            message("m2", "ana", "me"),
            message("m3", "ana", "bo"),
        ];

        let lines = conversation(&rows, "me");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].direction, Direction::Outgoing);
        assert_eq!(lines[0].peer, "ana");
        assert_eq!(lines[1].direction, Direction::Incoming);
        assert_eq!(lines[1].message.id, "m2");
    }
}
