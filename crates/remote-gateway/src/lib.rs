//! # Remote Gateway
//!
//! Typed request/response façade over the managed backend: table fetch,
//! insert, update and delete, row procedures, and object storage.
//!
//! ```text
//! RemoteGateway (typed records) → RemoteStore (JSON rows) → SupabaseStore | InMemoryStore
//! ```
//!
//! Rows are decoded into closed record types at this boundary; an unknown
//! enum value or a missing column is a data error, never passed through.
//! No call is retried here.

mod error;
mod gateway;
pub mod memory;
mod query;
pub mod records;
mod store;
mod supabase;

pub use error::{ErrorKind, RemoteError, RemoteResult};
pub use gateway::RemoteGateway;
pub use memory::{ChangeKind, InMemoryStore, RowChange, StoreCall, StoreOp};
pub use query::{CollectionQuery, EqFilter, SortOrder};
pub use records::{
    Entity, Message, NewMessage, NewTaskAttachment, Notification, Project, Readable, Record,
    Role, Task, TaskAttachment, TaskPriority, TeamMember, WorkStatus,
};
pub use store::RemoteStore;
pub use supabase::SupabaseStore;
