//! Supabase Realtime transport (Phoenix channels over WebSocket).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::{ChannelError, ChannelResult};
use crate::hub::HubFeed;
use crate::signal::{ChangeEvent, ConnectionStatus};
use crate::topic::TopicKey;
use crate::transport::Transport;

/// Realtime transport configuration.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket URL, e.g. `wss://xyz.supabase.co/realtime/v1/websocket?apikey=..&vsn=1.0.0`.
    pub url: String,
    /// User access token sent with every join.
    pub access_token: Option<String>,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Base reconnect delay in seconds.
    pub reconnect_base_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub reconnect_max_delay_secs: u64,
    /// How long a join waits for the server's reply.
    pub join_timeout_secs: u64,
}

impl RealtimeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: None,
            heartbeat_interval_secs: 30,
            reconnect_base_delay_secs: 2,
            reconnect_max_delay_secs: 30,
            join_timeout_secs: 10,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped.
fn backoff_delay(attempt: u32, base_secs: u64, max_secs: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let secs = base_secs.saturating_mul(2u64.saturating_pow(exp));
    Duration::from_secs(secs.min(max_secs))
}

/// A Phoenix channel frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    payload: Value,
    #[serde(rename = "ref", default)]
    msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

impl PhoenixMessage {
    fn join(key: &TopicKey, access_token: Option<&str>, msg_ref: String) -> Self {
        let mut change = json!({
            "event": "*",
            "schema": "public",
            "table": key.table,
        });
        if let Some(filter) = &key.filter {
            change["filter"] = Value::String(filter.to_string());
        }
        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change],
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }
        Self {
            topic: key.channel_name(),
            event: "phx_join".to_string(),
            payload,
            join_ref: Some(msg_ref.clone()),
            msg_ref: Some(msg_ref),
        }
    }

    fn leave(key: &TopicKey, msg_ref: String) -> Self {
        Self {
            topic: key.channel_name(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref),
            join_ref: None,
        }
    }

    fn heartbeat(msg_ref: String) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref),
            join_ref: None,
        }
    }

    fn to_frame(&self) -> ChannelResult<Message> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// Extract a change from a `postgres_changes` payload.
fn parse_change(payload: &Value) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    let table = data.get("table")?.as_str()?;
    let row = |name: &str| {
        data.get(name)
            .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
            .cloned()
    };
    Some(ChangeEvent {
        table: table.to_string(),
        record: row("record"),
        old_record: row("old_record"),
    })
}

type ReplySender = oneshot::Sender<Result<(), String>>;

/// A topic the transport keeps joined, keyed by channel name.
struct RemoteTopic {
    key: TopicKey,
    /// Ref of the latest join sent. Frames from older joins are ignored.
    join_ref: Option<String>,
}

struct Inner {
    config: RealtimeConfig,
    feed: HubFeed,
    sender: tokio::sync::Mutex<Option<mpsc::Sender<Message>>>,
    topics: Mutex<HashMap<String, RemoteTopic>>,
    pending: Mutex<HashMap<String, ReplySender>>,
    /// Channel name to the connection epoch its rejoin task belongs to.
    rejoining: Mutex<HashMap<String, u64>>,
    next_ref: AtomicU64,
    /// Bumped on every successful connect.
    epoch: AtomicU64,
    connected: AtomicBool,
    shutdown: AtomicBool,
}

impl Inner {
    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn remembers(&self, name: &str) -> bool {
        self.topics.lock().expect("lock poisoned").contains_key(name)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.connected.load(Ordering::SeqCst) && self.epoch.load(Ordering::SeqCst) == epoch
    }

    async fn send(&self, msg: &PhoenixMessage) -> ChannelResult<()> {
        let frame = msg.to_frame()?;
        let sender = self.sender.lock().await;
        let sender = sender.as_ref().ok_or(ChannelError::NotConnected)?;
        sender
            .send(frame)
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    /// Reconnect loop. Runs until shutdown.
    async fn run(self: Arc<Self>) {
        let mut attempts: u32 = 0;
        loop {
            match self.connect_once(&mut attempts).await {
                Ok(()) => info!("Realtime connection closed"),
                Err(e) => warn!(error = %e, "Realtime connection failed"),
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            self.feed.set_status(ConnectionStatus::Degraded);
            attempts = attempts.saturating_add(1);
            let delay = backoff_delay(
                attempts,
                self.config.reconnect_base_delay_secs,
                self.config.reconnect_max_delay_secs,
            );
            info!(attempt = attempts, delay_secs = delay.as_secs(), "Scheduling reconnect");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_once(self: &Arc<Self>, attempts: &mut u32) -> ChannelResult<()> {
        info!("Connecting to realtime");
        let (ws_stream, _) = connect_async(self.config.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(100);
        *self.sender.lock().await = Some(msg_tx.clone());

        let sender_handle = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let heartbeat_handle = {
            let inner = Arc::clone(self);
            let heartbeat_sender = msg_tx.clone();
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_secs(inner.config.heartbeat_interval_secs));
                loop {
                    ticker.tick().await;
                    let Ok(frame) = PhoenixMessage::heartbeat(inner.next_ref()).to_frame() else {
                        continue;
                    };
                    if heartbeat_sender.send(frame).await.is_err() {
                        break;
                    }
                }
            })
        };

        *attempts = 0;
        info!("Connected to realtime");
        self.resume();

        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => self.handle_text(&text),
                Ok(Message::Close(_)) => {
                    info!("Realtime connection closed by server");
                    break;
                }
                Ok(Message::Ping(data)) => {
                    let _ = msg_tx.send(Message::Pong(data)).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    break;
                }
            }
        }

        heartbeat_handle.abort();
        sender_handle.abort();
        *self.sender.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the reply senders fails every pending join.
        self.pending.lock().expect("lock poisoned").clear();

        Ok(())
    }

    /// Mark a fresh socket live and rejoin every remembered topic.
    ///
    /// Each topic stays degraded in the hub until the server acknowledges
    /// its rejoin.
    fn resume(self: &Arc<Self>) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(true, Ordering::SeqCst);

        let topics: Vec<TopicKey> = {
            let topics = self.topics.lock().expect("lock poisoned");
            topics.values().map(|t| t.key.clone()).collect()
        };
        for key in topics {
            self.feed.degrade(&key);
            self.spawn_rejoin(key, epoch, 0);
        }
        self.feed.set_status(ConnectionStatus::Connected);
    }

    /// Send a join for `key` and wait for the server's reply.
    async fn join_topic(&self, key: &TopicKey) -> ChannelResult<()> {
        let name = key.channel_name();
        let msg_ref = self.next_ref();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("lock poisoned")
            .insert(msg_ref.clone(), tx);
        if let Some(topic) = self.topics.lock().expect("lock poisoned").get_mut(&name) {
            topic.join_ref = Some(msg_ref.clone());
        }

        let msg = PhoenixMessage::join(key, self.config.access_token.as_deref(), msg_ref.clone());
        if let Err(e) = self.send(&msg).await {
            self.pending.lock().expect("lock poisoned").remove(&msg_ref);
            return Err(e);
        }

        let wait = Duration::from_secs(self.config.join_timeout_secs);
        match timeout(wait, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(ChannelError::JoinRejected { topic: name, reason }),
            Ok(Err(_)) => Err(ChannelError::NotConnected),
            Err(_) => {
                self.pending.lock().expect("lock poisoned").remove(&msg_ref);
                Err(ChannelError::Timeout)
            }
        }
    }

    /// Start a rejoin task for `key` unless one is already running on this
    /// connection. `attempts` above zero delays the first try.
    fn spawn_rejoin(self: &Arc<Self>, key: TopicKey, epoch: u64, attempts: u32) {
        let name = key.channel_name();
        {
            let mut rejoining = self.rejoining.lock().expect("lock poisoned");
            if rejoining.get(&name) == Some(&epoch) {
                debug!(topic = %key, "Rejoin already scheduled");
                return;
            }
            rejoining.insert(name, epoch);
        }
        tokio::spawn(Arc::clone(self).rejoin(key, epoch, attempts));
    }

    async fn rejoin(self: Arc<Self>, key: TopicKey, epoch: u64, mut attempts: u32) {
        let name = key.channel_name();
        loop {
            if attempts > 0 {
                let delay = backoff_delay(
                    attempts,
                    self.config.reconnect_base_delay_secs,
                    self.config.reconnect_max_delay_secs,
                );
                debug!(topic = %key, attempt = attempts, delay_secs = delay.as_secs(), "Scheduling rejoin");
                tokio::time::sleep(delay).await;
            }
            if !self.is_current(epoch) || !self.remembers(&name) {
                debug!(topic = %key, "Rejoin abandoned");
                break;
            }

            match self.join_topic(&key).await {
                Ok(()) => {
                    info!(topic = %key, "Rejoined topic");
                    self.feed.restore(&key);
                    break;
                }
                // The reconnect loop takes over.
                Err(ChannelError::NotConnected) => break,
                Err(e) => {
                    warn!(topic = %key, attempt = attempts, error = %e, "Rejoin failed");
                    self.feed.degrade(&key);
                    attempts = attempts.saturating_add(1);
                }
            }
        }

        let mut rejoining = self.rejoining.lock().expect("lock poisoned");
        if rejoining.get(&name) == Some(&epoch) {
            rejoining.remove(&name);
        }
    }

    fn handle_text(self: &Arc<Self>, text: &str) {
        let msg: PhoenixMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Failed to parse realtime frame");
                return;
            }
        };

        match msg.event.as_str() {
            "phx_reply" => {
                let Some(msg_ref) = &msg.msg_ref else { return };
                let waiter = self.pending.lock().expect("lock poisoned").remove(msg_ref);
                if let Some(waiter) = waiter {
                    let ok = msg.payload.get("status").and_then(Value::as_str) == Some("ok");
                    let result = if ok {
                        Ok(())
                    } else {
                        Err(msg
                            .payload
                            .get("response")
                            .map(Value::to_string)
                            .unwrap_or_else(|| "join rejected".to_string()))
                    };
                    let _ = waiter.send(result);
                }
            }
            "postgres_changes" => match parse_change(&msg.payload) {
                Some(event) => self.feed.deliver(event),
                None => warn!(topic = %msg.topic, "Malformed change payload"),
            },
            "phx_error" | "phx_close" => {
                let key = {
                    let topics = self.topics.lock().expect("lock poisoned");
                    topics
                        .get(&msg.topic)
                        .filter(|t| msg.join_ref.is_none() || msg.join_ref == t.join_ref)
                        .map(|t| t.key.clone())
                };
                match key {
                    Some(key) => {
                        warn!(topic = %key, event = %msg.event, "Channel closed by server; rejoining");
                        self.feed.degrade(&key);
                        self.spawn_rejoin(key, self.epoch.load(Ordering::SeqCst), 1);
                    }
                    None => debug!(topic = %msg.topic, event = %msg.event, "Channel closed"),
                }
            }
            other => debug!(topic = %msg.topic, event = other, "Ignored realtime frame"),
        }
    }
}

/// [`Transport`] over a Supabase Realtime socket with automatic reconnection.
///
/// Joined topics are remembered and rejoined after every reconnect. The hub
/// is told `Degraded` when the socket drops and `Connected` once it is back.
/// A topic the server errors, closes or refuses to rejoin is degraded on its
/// own and retried with backoff until a join is acknowledged.
pub struct RealtimeTransport {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeTransport {
    /// Create without connecting. Call [`RealtimeTransport::start`] to connect.
    pub fn new(config: RealtimeConfig, feed: HubFeed) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                config,
                feed,
                sender: tokio::sync::Mutex::new(None),
                topics: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                rejoining: Mutex::new(HashMap::new()),
                next_ref: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        })
    }

    /// Spawn the connection loop. No-op if already running.
    ///
    /// The hub is marked degraded until the first connect succeeds.
    pub fn start(&self) {
        let mut task = self.task.lock().expect("lock poisoned");
        if task.is_none() {
            if !self.is_connected() {
                self.inner.feed.set_status(ConnectionStatus::Degraded);
            }
            *task = Some(tokio::spawn(Arc::clone(&self.inner).run()));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Stop reconnecting and drop the socket.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().expect("lock poisoned").take() {
            task.abort();
        }
        *self.inner.sender.lock().await = None;
        self.inner.connected.store(false, Ordering::SeqCst);
        info!("Realtime transport shut down");
    }
}

impl Drop for RealtimeTransport {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for RealtimeTransport {
    async fn join(&self, key: &TopicKey) -> ChannelResult<()> {
        self.inner.topics.lock().expect("lock poisoned").insert(
            key.channel_name(),
            RemoteTopic {
                key: key.clone(),
                join_ref: None,
            },
        );
        self.inner.join_topic(key).await
    }

    async fn leave(&self, key: &TopicKey) -> ChannelResult<()> {
        self.inner
            .topics
            .lock()
            .expect("lock poisoned")
            .remove(&key.channel_name());
        if !self.is_connected() {
            return Ok(());
        }
        self.inner
            .send(&PhoenixMessage::leave(key, self.inner.next_ref()))
            .await
    }
}
