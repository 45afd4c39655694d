//! In-process realtime: replays [`InMemoryStore`] writes into a hub.

use change_channel::{ChangeEvent, ConnectionStatus, HubFeed};
use remote_gateway::InMemoryStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Forward every committed write in `store` to `feed` until the store is
/// dropped. Writes made before this call are not replayed.
pub fn spawn_loopback(store: &InMemoryStore, feed: HubFeed) -> JoinHandle<()> {
    let mut changes = store.changes();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    debug!(table = %change.table, kind = ?change.kind, "Loopback change");
                    let mut event = ChangeEvent::new(change.table);
                    event.record = change.record;
                    event.old_record = change.old_record;
                    feed.deliver(event);
                }
                Err(RecvError::Lagged(missed)) => {
                    // Lost events: bounce the status so every subscriber re-fetches.
                    warn!(missed, "Loopback lagged");
                    feed.set_status(ConnectionStatus::Degraded);
                    feed.set_status(ConnectionStatus::Connected);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
