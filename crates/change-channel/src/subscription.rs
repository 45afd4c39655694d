//! Subscriber handle.

use std::sync::Weak;

use tokio::sync::mpsc;
use tracing::debug;

use crate::hub::ChannelHub;
use crate::signal::ChangeSignal;
use crate::topic::TopicKey;

/// One subscriber's view of a topic.
///
/// Close it with [`Subscription::close`] to release the topic
/// deterministically. Dropping it releases the topic in the background
/// when a tokio runtime is available.
pub struct Subscription {
    id: u64,
    key: TopicKey,
    receiver: mpsc::UnboundedReceiver<ChangeSignal>,
    hub: Weak<ChannelHub>,
    closed: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        key: TopicKey,
        receiver: mpsc::UnboundedReceiver<ChangeSignal>,
        hub: Weak<ChannelHub>,
    ) -> Self {
        Self {
            id,
            key,
            receiver,
            hub,
            closed: false,
        }
    }

    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    /// Wait for the next signal. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<ChangeSignal> {
        self.receiver.recv().await
    }

    /// Next queued signal, if any.
    pub fn try_recv(&mut self) -> Option<ChangeSignal> {
        self.receiver.try_recv().ok()
    }

    /// Unsubscribe, leaving the topic if this was its last subscriber.
    pub async fn close(mut self) {
        self.closed = true;
        self.receiver.close();
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.key, self.id).await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let key = self.key.clone();
                let id = self.id;
                debug!(topic = %key, id, "Releasing dropped subscription");
                handle.spawn(async move {
                    hub.unsubscribe(&key, id).await;
                });
            }
            Err(_) => hub.forget(&self.key, self.id),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}
