//! Tokio driver around [`SyncMachine`].
//!
//! One task per mounted collection. It owns the machine, the subscription
//! and the in-flight fetch, and handles one event to completion before
//! taking the next.

use std::future::pending;
use std::sync::Arc;

use change_channel::{ChangeSignal, ChannelHub, Subscription, TopicKey};
use futures_util::future::BoxFuture;
use remote_gateway::{Record, RemoteResult};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::machine::{SyncCommand, SyncEvent, SyncMachine};
use crate::source::SnapshotSource;
use crate::view::CollectionView;

/// Poll interval used while the change channel is degraded.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often to re-fetch while change signals are unavailable.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

enum Control {
    Refresh,
    Close(oneshot::Sender<()>),
}

/// Cloneable handle that asks a synchronizer to re-fetch.
#[derive(Clone)]
pub struct RefreshHandle {
    key: TopicKey,
    tx: mpsc::UnboundedSender<Control>,
}

impl RefreshHandle {
    /// Request a re-fetch. Returns false once the synchronizer is closed.
    pub fn refresh(&self) -> bool {
        self.tx.send(Control::Refresh).is_ok()
    }

    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for RefreshHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshHandle").field("key", &self.key).finish()
    }
}

/// A mounted collection: live view plus controls.
pub struct CollectionSynchronizer<R: Record> {
    key: TopicKey,
    view_rx: watch::Receiver<CollectionView<R>>,
    control: mpsc::UnboundedSender<Control>,
    task: Option<JoinHandle<()>>,
}

impl<R: Record> CollectionSynchronizer<R> {
    /// Subscribe to `key`, then start the initial fetch from `source`.
    ///
    /// Returns once the subscription is in place, so no change committed
    /// after this call can be missed.
    pub async fn mount<S>(source: S, hub: &ChannelHub, key: TopicKey, config: SyncConfig) -> Self
    where
        S: SnapshotSource<R> + 'static,
    {
        let subscription = hub.subscribe(key.clone()).await;

        let machine = SyncMachine::new();
        let (view_tx, view_rx) = watch::channel(machine.view());
        let (control, control_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            key: key.clone(),
            source: Arc::new(source),
            machine,
            subscription: Some(subscription),
            control_rx,
            view_tx,
            in_flight: None,
            poller: None,
            config,
        };
        info!(topic = %key, "Mounting collection");
        let task = tokio::spawn(driver.run());

        Self {
            key,
            view_rx,
            control,
            task: Some(task),
        }
    }

    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    /// Current view.
    pub fn view(&self) -> CollectionView<R> {
        self.view_rx.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn watch(&self) -> watch::Receiver<CollectionView<R>> {
        self.view_rx.clone()
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        RefreshHandle {
            key: self.key.clone(),
            tx: self.control.clone(),
        }
    }

    pub fn refresh(&self) -> bool {
        self.control.send(Control::Refresh).is_ok()
    }

    /// Wait until `pred` holds for the view and return that view.
    pub async fn wait_until<F>(&self, pred: F) -> CollectionView<R>
    where
        F: FnMut(&CollectionView<R>) -> bool,
    {
        let mut rx = self.view_rx.clone();
        let view = match rx.wait_for(pred).await {
            Ok(view) => view.clone(),
            Err(_) => self.view(),
        };
        view
    }

    /// Unmount: discard any in-flight fetch and close the subscription.
    pub async fn close(mut self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.control.send(Control::Close(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl<R: Record> Drop for CollectionSynchronizer<R> {
    fn drop(&mut self) {
        if self.task.is_some() {
            let (done_tx, _) = oneshot::channel();
            let _ = self.control.send(Control::Close(done_tx));
        }
    }
}

impl<R: Record> std::fmt::Debug for CollectionSynchronizer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionSynchronizer")
            .field("key", &self.key)
            .field("phase", &self.view_rx.borrow().phase)
            .finish()
    }
}

type FetchFuture<R> = BoxFuture<'static, (u64, RemoteResult<Vec<R>>)>;

struct Driver<R: Record> {
    key: TopicKey,
    source: Arc<dyn SnapshotSource<R>>,
    machine: SyncMachine<R>,
    subscription: Option<Subscription>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    view_tx: watch::Sender<CollectionView<R>>,
    in_flight: Option<FetchFuture<R>>,
    poller: Option<Interval>,
    config: SyncConfig,
}

impl<R: Record> Driver<R> {
    async fn run(mut self) {
        self.dispatch(SyncEvent::Mount).await;

        loop {
            tokio::select! {
                signal = next_signal(&mut self.subscription) => match signal {
                    Some(signal) => self.on_signal(signal).await,
                    None => {
                        warn!(topic = %self.key, "Change channel gone; polling");
                        self.subscription = None;
                        self.start_polling();
                    }
                },
                control = self.control_rx.recv() => match control {
                    Some(Control::Refresh) => self.dispatch(SyncEvent::Refresh).await,
                    Some(Control::Close(done)) => {
                        self.dispatch(SyncEvent::Unmount).await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.dispatch(SyncEvent::Unmount).await;
                        break;
                    }
                },
                (seq, result) = next_fetch(&mut self.in_flight) => {
                    self.in_flight = None;
                    let result = result.map_err(SyncError::from);
                    self.dispatch(SyncEvent::FetchResolved { seq, result }).await;
                }
                _ = next_tick(&mut self.poller) => {
                    debug!(topic = %self.key, "Poll tick");
                    self.dispatch(SyncEvent::Signal).await;
                }
            }
        }
        info!(topic = %self.key, "Collection unmounted");
    }

    async fn on_signal(&mut self, signal: ChangeSignal) {
        match signal {
            ChangeSignal::Changed => {}
            ChangeSignal::Degraded => {
                warn!(topic = %self.key, "Change channel degraded; polling");
                self.start_polling();
            }
            ChangeSignal::Restored => {
                info!(topic = %self.key, "Change channel restored");
                self.poller = None;
            }
        }
        self.dispatch(SyncEvent::Signal).await;
    }

    fn start_polling(&mut self) {
        if self.poller.is_none() {
            let period = self.config.poll_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.poller = Some(ticker);
        }
    }

    async fn dispatch(&mut self, event: SyncEvent<R>) {
        let before = self.machine.revision();
        let commands = self.machine.handle(event);

        for command in commands {
            match command {
                SyncCommand::Fetch { seq } => {
                    debug!(topic = %self.key, seq, "Fetching snapshot");
                    let source = Arc::clone(&self.source);
                    self.in_flight = Some(Box::pin(async move { (seq, source.fetch().await) }));
                }
                SyncCommand::CloseSubscription => {
                    // Dropping the future discards the response.
                    self.in_flight = None;
                    self.poller = None;
                    if let Some(subscription) = self.subscription.take() {
                        subscription.close().await;
                    }
                }
            }
        }

        if self.machine.revision() != before {
            self.view_tx.send_replace(self.machine.view());
        }
    }
}

async fn next_signal(subscription: &mut Option<Subscription>) -> Option<ChangeSignal> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => pending().await,
    }
}

async fn next_fetch<R>(in_flight: &mut Option<FetchFuture<R>>) -> (u64, RemoteResult<Vec<R>>) {
    match in_flight {
        Some(fetch) => fetch.await,
        None => pending().await,
    }
}

async fn next_tick(poller: &mut Option<Interval>) {
    match poller {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::SyncPhase;
    use crate::source::TableSource;
    use change_channel::{ChangeEvent, ConnectionStatus, LocalTransport};
    use remote_gateway::{
        ErrorKind, InMemoryStore, Notification, RemoteGateway, RemoteStore, StoreOp,
    };
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryStore>,
        transport: Arc<LocalTransport>,
        hub: Arc<ChannelHub>,
        gateway: RemoteGateway,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(LocalTransport::new());
        let hub = ChannelHub::new(transport.clone());
        let gateway = RemoteGateway::new(store.clone());
        Fixture {
            store,
            transport,
            hub,
            gateway,
        }
    }

    fn notification(id: &str, ts: &str) -> serde_json::Value {
        json!({ "id": id, "title": id, "content": "c", "read": false, "created_at": ts })
    }

    async fn mount(fx: &Fixture, config: SyncConfig) -> CollectionSynchronizer<Notification> {
        CollectionSynchronizer::mount(
            TableSource::<Notification>::new(fx.gateway.clone(), None),
            &fx.hub,
            TopicKey::table("notifications"),
            config,
        )
        .await
    }

    fn changed(fx: &Fixture) {
        fx.hub.feed().deliver(ChangeEvent::new("notifications"));
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn ids(view: &CollectionView<Notification>) -> Vec<String> {
        view.data.ids().map(str::to_string).collect()
    }

    #[tokio::test]
    async fn mount_subscribes_then_loads() {
        let fx = fixture();
        fx.store.seed(
            "notifications",
            vec![
                notification("old", "2024-01-01T00:00:00Z"),
                notification("new", "2024-02-01T00:00:00Z"),
            ],
        );

        let sync = mount(&fx, SyncConfig::default()).await;
        assert!(fx.transport.is_joined(&TopicKey::table("notifications")));

        let view = sync.wait_until(|v| v.is_ready()).await;
        assert_eq!(ids(&view), vec!["new", "old"]);
        assert!(view.loaded);
        assert!(!view.loading);
        sync.close().await;
    }

    #[tokio::test]
    async fn change_signal_replaces_snapshot() {
        let fx = fixture();
        let sync = mount(&fx, SyncConfig::default()).await;
        sync.wait_until(|v| v.is_ready()).await;

        fx.store
            .insert_row("notifications", notification("n1", "2024-03-01T00:00:00Z"))
            .await
            .unwrap();
        changed(&fx);

        let view = sync.wait_until(|v| v.data.len() == 1).await;
        assert_eq!(ids(&view), vec!["n1"]);
        sync.close().await;
    }

    #[tokio::test]
    async fn signals_during_fetch_trigger_exactly_one_more_fetch() {
        let fx = fixture();
        fx.store.hold_fetches();
        let sync = mount(&fx, SyncConfig::default()).await;
        fx.store.wait_for_held_fetches(1).await;

        for _ in 0..5 {
            changed(&fx);
        }
        settle().await;

        assert!(fx.store.release_fetch());
        fx.store.wait_for_held_fetches(1).await;
        assert!(fx.store.release_fetch());
        sync.wait_until(|v| v.is_ready()).await;
        settle().await;

        assert_eq!(fx.store.count(StoreOp::Fetch), 2);
        fx.store.resume_fetches();
        sync.close().await;
    }

    #[tokio::test]
    async fn failed_fetch_keeps_data_and_sets_error() {
        let fx = fixture();
        fx.store
            .seed("notifications", vec![notification("a", "2024-01-01T00:00:00Z")]);
        let sync = mount(&fx, SyncConfig::default()).await;
        sync.wait_until(|v| v.is_ready()).await;

        fx.store.fail_next(StoreOp::Fetch, ErrorKind::Transport);
        changed(&fx);
        let view = sync.wait_until(|v| v.phase == SyncPhase::Error).await;
        assert_eq!(view.error.as_ref().map(|e| e.kind), Some(ErrorKind::Transport));
        assert_eq!(ids(&view), vec!["a"]);

        assert!(sync.refresh());
        let view = sync.wait_until(|v| v.is_ready()).await;
        assert!(view.error.is_none());
        sync.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_channel_falls_back_to_polling() {
        let fx = fixture();
        let config = SyncConfig {
            poll_interval: Duration::from_secs(15),
        };
        let sync = mount(&fx, config).await;
        sync.wait_until(|v| v.is_ready()).await;
        assert_eq!(fx.store.count(StoreOp::Fetch), 1);

        fx.hub.feed().set_status(ConnectionStatus::Degraded);
        settle().await;
        assert_eq!(fx.store.count(StoreOp::Fetch), 2);

        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(fx.store.count(StoreOp::Fetch), 3);

        fx.hub.feed().set_status(ConnectionStatus::Connected);
        settle().await;
        assert_eq!(fx.store.count(StoreOp::Fetch), 4);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(fx.store.count(StoreOp::Fetch), 4);
        sync.close().await;
    }

    #[tokio::test]
    async fn close_during_fetch_is_terminal() {
        let fx = fixture();
        fx.store.hold_fetches();
        let sync = mount(&fx, SyncConfig::default()).await;
        fx.store.wait_for_held_fetches(1).await;
        let watch = sync.watch();
        let handle = sync.refresh_handle();

        fx.store
            .seed("notifications", vec![notification("late", "2024-01-01T00:00:00Z")]);
        sync.close().await;
        fx.store.resume_fetches();
        settle().await;

        let view = watch.borrow().clone();
        assert_eq!(view.phase, SyncPhase::Closed);
        assert!(view.data.is_empty());
        assert!(!handle.refresh());
        assert_eq!(fx.transport.leave_calls(), 1);
        assert_eq!(fx.hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn refresh_handle_triggers_fetch() {
        let fx = fixture();
        let sync = mount(&fx, SyncConfig::default()).await;
        sync.wait_until(|v| v.is_ready()).await;

        fx.store
            .seed("notifications", vec![notification("x", "2024-01-01T00:00:00Z")]);
        let handle = sync.refresh_handle();
        assert!(handle.refresh());

        let view = sync.wait_until(|v| v.data.len() == 1).await;
        assert_eq!(ids(&view), vec!["x"]);
        sync.close().await;
    }
}
