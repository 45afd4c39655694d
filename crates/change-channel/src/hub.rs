//! Process-wide, reference-counted topic registry.
//!
//! Membership changes (first subscribe, last unsubscribe) are serialized by
//! an async lock so a join and a leave for the same topic never interleave.
//! Signal fan-out only takes the synchronous topic map lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::signal::{ChangeEvent, ChangeSignal, ConnectionStatus};
use crate::subscription::Subscription;
use crate::topic::TopicKey;
use crate::transport::Transport;

struct TopicEntry {
    subscribers: Vec<(u64, mpsc::UnboundedSender<ChangeSignal>)>,
    joined: bool,
}

impl TopicEntry {
    fn broadcast(&mut self, signal: ChangeSignal) -> usize {
        self.subscribers.retain(|(_, tx)| tx.send(signal).is_ok());
        self.subscribers.len()
    }
}

pub struct ChannelHub {
    transport: Arc<dyn Transport>,
    topics: Mutex<HashMap<TopicKey, TopicEntry>>,
    membership: tokio::sync::Mutex<()>,
    status: Mutex<ConnectionStatus>,
    next_id: AtomicU64,
    me: Weak<ChannelHub>,
}

impl ChannelHub {
    /// Hub over a transport that needs no way back in (e.g. [`LocalTransport`](crate::LocalTransport)).
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::with_transport(move |_| transport)
    }

    /// Hub whose transport is built with a [`HubFeed`] pointing back at it.
    pub fn with_transport<F>(make: F) -> Arc<Self>
    where
        F: FnOnce(HubFeed) -> Arc<dyn Transport>,
    {
        Arc::new_cyclic(|me: &Weak<ChannelHub>| Self {
            transport: make(HubFeed { hub: me.clone() }),
            topics: Mutex::new(HashMap::new()),
            membership: tokio::sync::Mutex::new(()),
            status: Mutex::new(ConnectionStatus::Connected),
            next_id: AtomicU64::new(1),
            me: me.clone(),
        })
    }

    /// Handle for pushing events and status into this hub.
    pub fn feed(&self) -> HubFeed {
        HubFeed {
            hub: self.me.clone(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock().expect("lock poisoned")
    }

    /// Subscribe to `key`. Joins the topic on the transport if this is its
    /// first subscriber.
    ///
    /// A failed join still yields a subscription, which immediately receives
    /// [`ChangeSignal::Degraded`].
    pub async fn subscribe(&self, key: TopicKey) -> Subscription {
        let _membership = self.membership.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let first = {
            let mut topics = self.topics.lock().expect("lock poisoned");
            match topics.get_mut(&key) {
                Some(entry) => {
                    entry.subscribers.push((id, tx.clone()));
                    false
                }
                None => {
                    topics.insert(
                        key.clone(),
                        TopicEntry {
                            subscribers: vec![(id, tx.clone())],
                            joined: false,
                        },
                    );
                    true
                }
            }
        };

        let mut degraded = self.status() == ConnectionStatus::Degraded;
        if first {
            match self.transport.join(&key).await {
                Ok(()) => {
                    info!(topic = %key, "Joined topic");
                    self.set_joined(&key, true);
                }
                Err(e) => {
                    warn!(topic = %key, error = %e, "Topic join failed");
                    degraded = true;
                }
            }
        } else if !self.is_joined(&key) {
            degraded = true;
        }

        if degraded {
            let _ = tx.send(ChangeSignal::Degraded);
        }
        debug!(topic = %key, id, "Subscribed");
        Subscription::new(id, key, rx, self.me.clone())
    }

    /// Remove subscriber `id`; leaves the topic when it was the last one.
    pub(crate) async fn unsubscribe(&self, key: &TopicKey, id: u64) {
        let _membership = self.membership.lock().await;

        let leave = {
            let mut topics = self.topics.lock().expect("lock poisoned");
            let Some(entry) = topics.get_mut(key) else {
                return;
            };
            entry.subscribers.retain(|(sub, _)| *sub != id);
            if entry.subscribers.is_empty() {
                topics.remove(key).map(|e| e.joined).unwrap_or(false)
            } else {
                return;
            }
        };

        if leave {
            if let Err(e) = self.transport.leave(key).await {
                warn!(topic = %key, error = %e, "Topic leave failed");
            } else {
                info!(topic = %key, "Left topic");
            }
        } else {
            debug!(topic = %key, "Dropped never-joined topic");
        }
    }

    /// Synchronous removal for drops outside a runtime. The topic stays
    /// joined on the transport.
    pub(crate) fn forget(&self, key: &TopicKey, id: u64) {
        let mut topics = self.topics.lock().expect("lock poisoned");
        if let Some(entry) = topics.get_mut(key) {
            entry.subscribers.retain(|(sub, _)| *sub != id);
        }
        warn!(topic = %key, "Subscription dropped outside a runtime; leave skipped");
    }

    pub fn subscriber_count(&self, key: &TopicKey) -> usize {
        let topics = self.topics.lock().expect("lock poisoned");
        topics.get(key).map(|e| e.subscribers.len()).unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().expect("lock poisoned").len()
    }

    pub fn is_joined(&self, key: &TopicKey) -> bool {
        let topics = self.topics.lock().expect("lock poisoned");
        topics.get(key).is_some_and(|e| e.joined)
    }

    fn set_joined(&self, key: &TopicKey, joined: bool) {
        let mut topics = self.topics.lock().expect("lock poisoned");
        if let Some(entry) = topics.get_mut(key) {
            entry.joined = joined;
        }
    }

    fn deliver(&self, event: &ChangeEvent) {
        let mut topics = self.topics.lock().expect("lock poisoned");
        let mut notified = 0;
        for (key, entry) in topics.iter_mut() {
            if key.matches(event) {
                notified += entry.broadcast(ChangeSignal::Changed);
            }
        }
        debug!(table = %event.table, notified, "Delivered change");
    }

    fn set_status(&self, status: ConnectionStatus) {
        {
            let mut current = self.status.lock().expect("lock poisoned");
            if *current == status {
                return;
            }
            *current = status;
        }

        let signal = match status {
            ConnectionStatus::Connected => ChangeSignal::Restored,
            ConnectionStatus::Degraded => ChangeSignal::Degraded,
        };
        let mut topics = self.topics.lock().expect("lock poisoned");
        let mut notified = 0;
        // Topics without an acknowledged join already heard Degraded and
        // stay degraded until the transport restores them one by one.
        for entry in topics.values_mut().filter(|e| e.joined) {
            notified += entry.broadcast(signal);
        }
        info!(?status, topics = topics.len(), notified, "Channel status changed");
    }

    /// Per-topic counterpart of [`ChannelHub::set_status`]. Subscribers only
    /// hear about it while the connection itself is up.
    fn set_delivering(&self, key: &TopicKey, joined: bool) {
        let connected = self.status() == ConnectionStatus::Connected;
        let mut topics = self.topics.lock().expect("lock poisoned");
        let Some(entry) = topics.get_mut(key) else {
            return;
        };
        if entry.joined == joined {
            return;
        }
        entry.joined = joined;
        if connected {
            let signal = if joined {
                ChangeSignal::Restored
            } else {
                ChangeSignal::Degraded
            };
            let notified = entry.broadcast(signal);
            info!(topic = %key, joined, notified, "Topic delivery changed");
        }
    }
}

impl std::fmt::Debug for ChannelHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHub")
            .field("status", &self.status())
            .field("topics", &self.topic_count())
            .finish_non_exhaustive()
    }
}

/// The transport's way back into the hub. Holds the hub weakly.
#[derive(Clone)]
pub struct HubFeed {
    hub: Weak<ChannelHub>,
}

impl HubFeed {
    /// Fan a row change out as [`ChangeSignal::Changed`] to every matching topic.
    pub fn deliver(&self, event: ChangeEvent) {
        if let Some(hub) = self.hub.upgrade() {
            hub.deliver(&event);
        }
    }

    /// Report connection health. Only transitions are broadcast.
    pub fn set_status(&self, status: ConnectionStatus) {
        if let Some(hub) = self.hub.upgrade() {
            hub.set_status(status);
        }
    }

    /// The server dropped or refused `key`: its subscribers fall back to polling.
    pub fn degrade(&self, key: &TopicKey) {
        if let Some(hub) = self.hub.upgrade() {
            hub.set_delivering(key, false);
        }
    }

    /// A join for `key` was acknowledged again.
    pub fn restore(&self, key: &TopicKey) {
        if let Some(hub) = self.hub.upgrade() {
            hub.set_delivering(key, true);
        }
    }
}

impl std::fmt::Debug for HubFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubFeed")
            .field("attached", &(self.hub.strong_count() > 0))
            .finish()
    }
}
