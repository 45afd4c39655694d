//! Closed record types for every synchronized collection.
//!
//! Each type maps one table row. Decoding goes through serde, so an unknown
//! `status`, `priority` or `role` value, or a missing required column, is
//! rejected as [`ErrorKind::Data`](crate::ErrorKind::Data).

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RemoteError, RemoteResult};
use crate::query::SortOrder;

/// A row-shaped unit of remote state with a stable identifier.
pub trait Record: DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Backing table (also the change-channel topic).
    const TABLE: &'static str;
    /// Server-side ordering requested on fetch.
    const ORDER: SortOrder;

    /// Identifier unique within the collection.
    fn id(&self) -> &str;

    /// Local ordering matching [`Record::ORDER`]. Ties are broken by id by the caller.
    fn cmp_order(&self, other: &Self) -> Ordering;

    /// Decode a JSON row.
    fn from_row(row: Value) -> RemoteResult<Self> {
        serde_json::from_value(row).map_err(|e| RemoteError::Decode {
            table: Self::TABLE.to_string(),
            message: e.to_string(),
        })
    }
}

/// Records carrying a read flag.
pub trait Readable {
    fn is_read(&self) -> bool;
}

/// Sorts a snapshot into its total order: record order, then id.
pub fn sort_snapshot<R: Record>(rows: &mut [R]) {
    rows.sort_by(|a, b| a.cmp_order(b).then_with(|| a.id().cmp(b.id())));
}

fn cmp_desc<T: Ord>(a: &T, b: &T) -> Ordering {
    b.cmp(a)
}

fn cmp_nulls_last<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Workflow state shared by tasks and projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Todo,
    InProgress,
    Review,
    Completed,
}

impl WorkStatus {
    pub const ALL: [WorkStatus; 4] = [
        WorkStatus::Todo,
        WorkStatus::InProgress,
        WorkStatus::Review,
        WorkStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Todo => "todo",
            WorkStatus::InProgress => "in_progress",
            WorkStatus::Review => "review",
            WorkStatus::Completed => "completed",
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

/// Workspace membership role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Guest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Guest => "guest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Record for Notification {
    const TABLE: &'static str = "notifications";
    const ORDER: SortOrder = SortOrder::desc("created_at");

    fn id(&self) -> &str {
        &self.id
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        cmp_desc(&self.created_at, &other.created_at)
    }
}

impl Readable for Notification {
    fn is_read(&self) -> bool {
        self.read
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Record for Message {
    const TABLE: &'static str = "messages";
    const ORDER: SortOrder = SortOrder::desc("created_at");

    fn id(&self) -> &str {
        &self.id
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        cmp_desc(&self.created_at, &other.created_at)
    }
}

impl Readable for Message {
    fn is_read(&self) -> bool {
        self.read
    }
}

/// Insert payload for [`Message`].
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub content: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    pub status: WorkStatus,
    pub priority: TaskPriority,
    #[serde(default, with = "flexible_datetime")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for Task {
    const TABLE: &'static str = "tasks";
    const ORDER: SortOrder = SortOrder::asc("due_date");

    fn id(&self) -> &str {
        &self.id
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        cmp_nulls_last(&self.due_date, &other.due_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAttachment {
    pub id: String,
    pub task_id: String,
    pub name: String,
    pub file_url: String,
    pub file_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for TaskAttachment {
    const TABLE: &'static str = "task_attachments";
    const ORDER: SortOrder = SortOrder::asc("created_at");

    fn id(&self) -> &str {
        &self.id
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        cmp_nulls_last(&self.created_at, &other.created_at)
    }
}

/// Insert payload for [`TaskAttachment`].
#[derive(Debug, Clone, Serialize)]
pub struct NewTaskAttachment {
    pub task_id: String,
    pub name: String,
    pub file_url: String,
    pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    pub status: WorkStatus,
    #[serde(default, with = "flexible_datetime")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_datetime")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Record for Project {
    const TABLE: &'static str = "projects";
    const ORDER: SortOrder = SortOrder::desc("created_at");

    fn id(&self) -> &str {
        &self.id
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        cmp_desc(&self.created_at, &other.created_at)
    }
}

/// Roster entry returned by the `get_workspace_members` procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub user_id: String,
    pub role: Role,
    pub email: String,
    pub joined_at: DateTime<Utc>,
}

impl Record for TeamMember {
    const TABLE: &'static str = "workspace_members";
    const ORDER: SortOrder = SortOrder::asc("joined_at");

    fn id(&self) -> &str {
        &self.user_id
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        self.joined_at.cmp(&other.joined_at)
    }
}

/// Any synchronized row, tagged by its collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Notification(Notification),
    Message(Message),
    Task(Task),
    Attachment(TaskAttachment),
    Project(Project),
    Member(TeamMember),
}

impl Entity {
    /// Map an untyped row from `table` onto its variant.
    pub fn from_row(table: &str, row: Value) -> RemoteResult<Self> {
        match table {
            t if t == Notification::TABLE => Notification::from_row(row).map(Entity::Notification),
            t if t == Message::TABLE => Message::from_row(row).map(Entity::Message),
            t if t == Task::TABLE => Task::from_row(row).map(Entity::Task),
            t if t == TaskAttachment::TABLE => TaskAttachment::from_row(row).map(Entity::Attachment),
            t if t == Project::TABLE => Project::from_row(row).map(Entity::Project),
            t if t == TeamMember::TABLE => TeamMember::from_row(row).map(Entity::Member),
            other => Err(RemoteError::Decode {
                table: other.to_string(),
                message: "unknown collection".to_string(),
            }),
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Entity::Notification(_) => Notification::TABLE,
            Entity::Message(_) => Message::TABLE,
            Entity::Task(_) => Task::TABLE,
            Entity::Attachment(_) => TaskAttachment::TABLE,
            Entity::Project(_) => Project::TABLE,
            Entity::Member(_) => TeamMember::TABLE,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Notification(r) => r.id(),
            Entity::Message(r) => r.id(),
            Entity::Task(r) => r.id(),
            Entity::Attachment(r) => r.id(),
            Entity::Project(r) => r.id(),
            Entity::Member(r) => r.id(),
        }
    }
}

/// Nullable text column read as a plain string.
fn null_as_empty<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 timestamps, naive `YYYY-MM-DDTHH:MM:SS` and plain
/// `YYYY-MM-DD` dates (midnight UTC).
mod flexible_datetime {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }

    pub(super) fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(naive.and_utc());
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(naive.and_utc());
            }
        }
        Err(format!("unrecognized date: {}", raw))
    }
}
