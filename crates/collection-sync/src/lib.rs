//! # Collection Sync
//!
//! Keeps one local, ordered snapshot of a remote collection consistent
//! with the server while a view is mounted.
//!
//! ```text
//! Subscription ─┐
//! Refresh ──────┼─▶ SyncMachine (pure) ─▶ commands ─▶ SnapshotSource::fetch
//! Poll ticker ──┘          │
//!                          ▼
//!                  watch<CollectionView>
//! ```
//!
//! Every signal leads to a full re-fetch that replaces the snapshot. At
//! most one fetch is in flight; signals arriving meanwhile collapse into a
//! single trailing fetch. Responses carry a sequence number and only one
//! newer than everything applied so far is accepted.

mod error;
mod machine;
mod source;
mod synchronizer;
mod view;

pub use error::SyncError;
pub use machine::{SyncCommand, SyncEvent, SyncMachine, SyncPhase};
pub use source::{ProcedureSource, SnapshotSource, TableSource};
pub use synchronizer::{CollectionSynchronizer, RefreshHandle, SyncConfig, DEFAULT_POLL_INTERVAL};
pub use view::{CollectionView, Snapshot};
