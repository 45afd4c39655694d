//! Plain-text rendering of collection views.

use collection_sync::CollectionView;
use read_model::{
    conversation, count_by_status, group_by_parent, roster_by_role, unread_count, Direction,
    Presentation,
};
use remote_gateway::{Message, Notification, Project, Task, TaskAttachment, TeamMember};

pub fn print_view<R>(title: &str, view: &CollectionView<R>, lines: impl Fn(&[R]) -> Vec<String>) {
    match Presentation::of(view) {
        Presentation::Loading => println!("{title}: loading"),
        // Wait for the re-fetch instead of printing the same rows twice.
        Presentation::Fresh {
            refreshing: true, ..
        } => {}
        Presentation::Fresh { records, .. } => {
            println!("{title}:");
            print_lines(lines(records));
        }
        Presentation::Stale { records, error } => {
            println!("{title} (stale: {error}):");
            print_lines(lines(records));
        }
        Presentation::Failed(error) => println!("{title}: {error}"),
    }
}

fn print_lines(lines: Vec<String>) {
    if lines.is_empty() {
        println!("  (empty)");
    }
    for line in lines {
        println!("  {line}");
    }
}

fn read_mark(read: bool) -> char {
    if read {
        ' '
    } else {
        '*'
    }
}

pub fn notifications(rows: &[Notification]) -> Vec<String> {
    let mut lines = vec![format!("{} unread", unread_count(rows))];
    lines.extend(rows.iter().map(|n| {
        format!(
            "{} {} {}: {}",
            read_mark(n.read),
            n.created_at.format("%Y-%m-%d %H:%M"),
            n.title,
            n.content
        )
    }));
    lines
}

/// Conversation lines for `me`; every message when no user is known.
pub fn messages(rows: &[Message], me: &str) -> Vec<String> {
    if me.is_empty() {
        return rows
            .iter()
            .map(|m| format!("{} {} -> {}: {}", read_mark(m.read), m.sender_id, m.recipient_id, m.content))
            .collect();
    }
    conversation(rows, me)
        .into_iter()
        .map(|line| {
            let arrow = match line.direction {
                Direction::Outgoing => "to",
                Direction::Incoming => "from",
            };
            format!(
                "{} {} {}: {}",
                read_mark(line.message.read),
                arrow,
                line.peer,
                line.message.content
            )
        })
        .collect()
}

pub fn tasks(rows: &[Task]) -> Vec<String> {
    let summary = count_by_status(rows)
        .into_iter()
        .map(|(status, count)| format!("{} {}", status.as_str(), count))
        .collect::<Vec<_>>()
        .join(", ");
    let mut lines = vec![summary];
    lines.extend(rows.iter().map(|t| {
        let due = t
            .due_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{:<11} {:<6} {:<10} {}",
            t.status.as_str(),
            t.priority.as_str(),
            due,
            t.title
        )
    }));
    lines
}

pub fn projects(rows: &[Project]) -> Vec<String> {
    rows.iter()
        .map(|p| format!("{:<11} {}", p.status.as_str(), p.name))
        .collect()
}

pub fn attachments(rows: &[TaskAttachment]) -> Vec<String> {
    group_by_parent(rows)
        .into_values()
        .flatten()
        .map(|a| format!("{} {} ({}) {}", a.id, a.name, a.file_type, a.file_url))
        .collect()
}

pub fn roster(rows: &[TeamMember]) -> Vec<String> {
    roster_by_role(rows)
        .into_iter()
        .flat_map(|(role, members)| {
            members
                .into_iter()
                .map(move |m| format!("{:<6} {}", role.as_str(), m.email))
        })
        .collect()
}
