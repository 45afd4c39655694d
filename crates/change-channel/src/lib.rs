//! # Change Channel
//!
//! Turns remote row changes into payload-free [`ChangeSignal`]s for every
//! local subscriber of a matching topic.
//!
//! The [`ChannelHub`] is shared process-wide. It joins a topic on the
//! transport when the first subscriber arrives and leaves it when the last
//! one goes away, so two views on the same collection share one remote
//! subscription. Transports push events back through a [`HubFeed`].
//!
//! A failed join or a dropped connection is reported to subscribers as
//! [`ChangeSignal::Degraded`], never swallowed.

mod error;
mod hub;
mod realtime;
mod signal;
mod subscription;
mod topic;
mod transport;

pub use error::{ChannelError, ChannelResult};
pub use hub::{ChannelHub, HubFeed};
pub use realtime::{RealtimeConfig, RealtimeTransport};
pub use signal::{ChangeEvent, ChangeSignal, ConnectionStatus};
pub use subscription::Subscription;
pub use topic::TopicKey;
pub use transport::{LocalTransport, Transport};
