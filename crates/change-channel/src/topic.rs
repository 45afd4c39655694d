//! Topic identity.

use remote_gateway::{EqFilter, Record};
use serde_json::Value;

use crate::signal::ChangeEvent;

/// A logical change topic: one table, optionally narrowed by an equality filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    pub table: String,
    pub filter: Option<EqFilter>,
}

impl TopicKey {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    pub fn filtered(table: impl Into<String>, filter: EqFilter) -> Self {
        Self {
            table: table.into(),
            filter: Some(filter),
        }
    }

    /// Topic for the collection backing `R`.
    pub fn for_record<R: Record>(filter: Option<EqFilter>) -> Self {
        Self {
            table: R::TABLE.to_string(),
            filter,
        }
    }

    /// Realtime channel name, e.g. `realtime:public:task_attachments:task_id=eq.T1`.
    pub fn channel_name(&self) -> String {
        match &self.filter {
            Some(filter) => format!("realtime:public:{}:{}", self.table, filter),
            None => format!("realtime:public:{}", self.table),
        }
    }

    /// Whether `event` may concern this topic.
    ///
    /// Errs toward matching: an event with no row, or a row lacking the
    /// filter column (deletes often carry only the primary key), matches.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        let rows: Vec<&Value> = event.record.iter().chain(event.old_record.iter()).collect();
        if rows.is_empty() {
            return true;
        }
        rows.iter()
            .any(|row| row.get(&filter.column).is_none() || filter.matches(row))
    }
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}[{}]", self.table, filter),
            None => f.write_str(&self.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attachments(task: &str) -> TopicKey {
        TopicKey::filtered("task_attachments", EqFilter::new("task_id", task))
    }

    #[test]
    fn unfiltered_topic_matches_its_table_only() {
        let topic = TopicKey::table("tasks");
        assert!(topic.matches(&ChangeEvent::new("tasks")));
        assert!(!topic.matches(&ChangeEvent::new("projects")));
    }

    #[test]
    fn filtered_topic_checks_new_and_old_rows() {
        let topic = attachments("T1");

        let insert = ChangeEvent::new("task_attachments").with_record(json!({ "task_id": "T1" }));
        assert!(topic.matches(&insert));

        let other = ChangeEvent::new("task_attachments").with_record(json!({ "task_id": "T2" }));
        assert!(!topic.matches(&other));

        let moved = ChangeEvent::new("task_attachments")
            .with_record(json!({ "task_id": "T2" }))
            .with_old_record(json!({ "task_id": "T1" }));
        assert!(topic.matches(&moved));
    }

    #[test]
    fn filtered_topic_matches_conservatively() {
        let topic = attachments("T1");
        assert!(topic.matches(&ChangeEvent::new("task_attachments")));

        let key_only_delete =
            ChangeEvent::new("task_attachments").with_old_record(json!({ "id": "a1" }));
        assert!(topic.matches(&key_only_delete));
    }

    #[test]
    fn channel_names() {
        assert_eq!(TopicKey::table("tasks").channel_name(), "realtime:public:tasks");
        assert_eq!(
            attachments("T1").channel_name(),
            "realtime:public:task_attachments:task_id=eq.T1"
        );
        assert_eq!(attachments("T1").to_string(), "task_attachments[task_id=eq.T1]");
    }
}
