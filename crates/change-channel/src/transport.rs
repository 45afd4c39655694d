//! Transport contract and the in-process transport.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ChannelError, ChannelResult};
use crate::topic::TopicKey;

/// The remote side of the hub: joins and leaves topics.
///
/// Events flow the other way, through the [`HubFeed`](crate::HubFeed) the
/// transport was built with.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start receiving events for `topic`. Resolves once the join is confirmed.
    async fn join(&self, topic: &TopicKey) -> ChannelResult<()>;

    /// Stop receiving events for `topic`.
    async fn leave(&self, topic: &TopicKey) -> ChannelResult<()>;
}

#[derive(Default)]
struct LocalState {
    joined: Vec<TopicKey>,
    join_calls: usize,
    leave_calls: usize,
    join_failures: VecDeque<String>,
}

/// In-process transport. Events are pushed by calling the hub feed directly.
#[derive(Default)]
pub struct LocalTransport {
    state: Mutex<LocalState>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next join with `reason`.
    pub fn fail_next_join(&self, reason: impl Into<String>) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.join_failures.push_back(reason.into());
    }

    /// Topics currently joined.
    pub fn joined(&self) -> Vec<TopicKey> {
        self.state.lock().expect("lock poisoned").joined.clone()
    }

    pub fn is_joined(&self, topic: &TopicKey) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        state.joined.contains(topic)
    }

    pub fn join_calls(&self) -> usize {
        self.state.lock().expect("lock poisoned").join_calls
    }

    pub fn leave_calls(&self) -> usize {
        self.state.lock().expect("lock poisoned").leave_calls
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn join(&self, topic: &TopicKey) -> ChannelResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.join_calls += 1;
        if let Some(reason) = state.join_failures.pop_front() {
            return Err(ChannelError::JoinRejected {
                topic: topic.channel_name(),
                reason,
            });
        }
        if !state.joined.contains(topic) {
            state.joined.push(topic.clone());
        }
        debug!(%topic, "Joined local topic");
        Ok(())
    }

    async fn leave(&self, topic: &TopicKey) -> ChannelResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.leave_calls += 1;
        state.joined.retain(|t| t != topic);
        debug!(%topic, "Left local topic");
        Ok(())
    }
}
