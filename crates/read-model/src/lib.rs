//! # Read Model
//!
//! Derived views over snapshots owned by the collection synchronizers.
//! Everything here borrows; nothing is cached, so a projection is simply
//! recomputed whenever a new snapshot is published.

mod attachments;
mod messages;
mod presentation;
mod roster;
mod tasks;

pub use attachments::group_by_parent;
pub use messages::{conversation, unread_count, ConversationLine, Direction};
pub use presentation::Presentation;
pub use roster::roster_by_role;
pub use tasks::{count_by_status, search_tasks, tasks_with_status};
