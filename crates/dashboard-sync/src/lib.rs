//! # Dashboard Sync
//!
//! Wires the gateway, the shared change hub and the attachment manager
//! into one handle. Views mount the collections they show and get back a
//! [`CollectionSynchronizer`](collection_sync::CollectionSynchronizer);
//! dropping or closing it unmounts. User actions return their outcome and
//! never touch a snapshot directly: the resulting row change comes back
//! through the change channel like any other write.

mod dashboard;
mod error;
mod loopback;

pub use dashboard::{Dashboard, DashboardConfig, ROSTER_PROCEDURE};
pub use error::{ActionError, ActionResult};
pub use loopback::spawn_loopback;
