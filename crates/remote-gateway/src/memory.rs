//! Deterministic in-process [`RemoteStore`] for tests and offline demos.
//!
//! Besides answering like the real backend, it records every call, can
//! fail the next call of a given operation, can hold fetches until the test
//! releases them, and broadcasts every row write as a [`RowChange`] so a
//! loopback bridge can play the part of the realtime channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::debug;

use crate::error::{ErrorKind, RemoteError, RemoteResult};
use crate::query::{CollectionQuery, EqFilter, SortOrder};
use crate::store::RemoteStore;

/// Default object size limit (5 MB).
pub const DEFAULT_MAX_OBJECT_BYTES: usize = 5 * 1024 * 1024;

const DEFAULT_BASE_URL: &str = "http://store.local";
const CHANGE_BUFFER: usize = 256;

/// Operation kinds, for call recording and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Fetch,
    Insert,
    Update,
    Delete,
    Procedure,
    Upload,
    RemoveObject,
}

/// One recorded call: the operation and its table, procedure or object path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A committed row write.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub table: String,
    pub kind: ChangeKind,
    /// Row after the write; `None` for deletes.
    pub record: Option<Value>,
    /// Row before the write; `None` for inserts.
    pub old_record: Option<Value>,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Value>>,
    procedures: HashMap<String, Vec<Value>>,
    objects: HashMap<String, Vec<u8>>,
    calls: Vec<StoreCall>,
    faults: HashMap<StoreOp, VecDeque<ErrorKind>>,
    holding: bool,
    held: VecDeque<oneshot::Sender<()>>,
}

pub struct InMemoryStore {
    base_url: String,
    max_object_bytes: usize,
    state: Mutex<State>,
    changes: broadcast::Sender<RowChange>,
    held_count: watch::Sender<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let (held_count, _) = watch::channel(0);
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
            state: Mutex::new(State::default()),
            changes,
            held_count,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_object_bytes(mut self, limit: usize) -> Self {
        self.max_object_bytes = limit;
        self
    }

    pub fn max_object_bytes(&self) -> usize {
        self.max_object_bytes
    }

    /// Replace the rows of `table` without emitting changes.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.tables.insert(table.to_string(), rows);
    }

    /// Set the rows returned by procedure `name`.
    pub fn set_procedure(&self, name: &str, rows: Vec<Value>) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.procedures.insert(name.to_string(), rows);
    }

    /// Current rows of `table`, in storage order.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        let state = self.state.lock().expect("lock poisoned");
        state.tables.get(table).cloned().unwrap_or_default()
    }

    /// Make the next call of `op` fail with `kind`. Queued faults apply in order.
    pub fn fail_next(&self, op: StoreOp, kind: ErrorKind) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.faults.entry(op).or_default().push_back(kind);
    }

    /// Every call received so far, failed ones included.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().expect("lock poisoned").calls.clone()
    }

    pub fn count(&self, op: StoreOp) -> usize {
        let state = self.state.lock().expect("lock poisoned");
        state.calls.iter().filter(|c| c.op == op).count()
    }

    /// Stored object keys, as `bucket/path`.
    pub fn objects(&self) -> Vec<String> {
        let state = self.state.lock().expect("lock poisoned");
        let mut keys: Vec<_> = state.objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn has_object(&self, bucket: &str, path: &str) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        state.objects.contains_key(&object_key(bucket, path))
    }

    /// Subscribe to committed row writes.
    pub fn changes(&self) -> broadcast::Receiver<RowChange> {
        self.changes.subscribe()
    }

    /// Park every subsequent fetch until released.
    pub fn hold_fetches(&self) {
        self.state.lock().expect("lock poisoned").holding = true;
    }

    /// Let the oldest parked fetch proceed. Returns false if none was parked.
    pub fn release_fetch(&self) -> bool {
        let waiter = {
            let mut state = self.state.lock().expect("lock poisoned");
            let waiter = state.held.pop_front();
            self.held_count.send_replace(state.held.len());
            waiter
        };
        match waiter {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Stop holding and release every parked fetch.
    pub fn resume_fetches(&self) {
        let waiters: Vec<_> = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.holding = false;
            self.held_count.send_replace(0);
            state.held.drain(..).collect()
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }

    /// Number of fetches currently parked.
    pub fn held_fetches(&self) -> usize {
        *self.held_count.borrow()
    }

    /// Wait until at least `n` fetches are parked.
    pub async fn wait_for_held_fetches(&self, n: usize) {
        let mut rx = self.held_count.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Record the call and pop a pending fault for it.
    fn begin(&self, op: StoreOp, target: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.calls.push(StoreCall {
            op,
            target: target.to_string(),
        });
        match state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(kind) => {
                debug!(?op, target, %kind, "Injected store failure");
                Err(RemoteError::of_kind(kind, format!("injected {} failure", kind)))
            }
            None => Ok(()),
        }
    }

    async fn gate_fetch(&self) {
        let parked = {
            let mut state = self.state.lock().expect("lock poisoned");
            if !state.holding {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.held.push_back(tx);
                self.held_count.send_replace(state.held.len());
                Some(rx)
            }
        };
        if let Some(rx) = parked {
            let _ = rx.await;
        }
    }

    fn emit(&self, table: &str, kind: ChangeKind, record: Option<Value>, old_record: Option<Value>) {
        // No receivers is fine.
        let _ = self.changes.send(RowChange {
            table: table.to_string(),
            kind,
            record,
            old_record,
        });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("base_url", &self.base_url)
            .field("max_object_bytes", &self.max_object_bytes)
            .finish_non_exhaustive()
    }
}

fn object_key(bucket: &str, path: &str) -> String {
    format!("{}/{}", bucket, path)
}

fn as_object(table: &str, value: Value) -> RemoteResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RemoteError::Validation(format!(
            "{} row must be an object, got {}",
            table, other
        ))),
    }
}

/// Column ordering with nulls last in both directions.
fn compare_rows(a: &Value, b: &Value, order: &SortOrder) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let key = |row: &Value| row.get(order.column).filter(|v| !v.is_null()).cloned();
    match (key(a), key(b)) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(x), Some(y)) => {
            let ord = match (&x, &y) {
                (Value::Number(m), Value::Number(n)) => m
                    .as_f64()
                    .partial_cmp(&n.as_f64())
                    .unwrap_or(Ordering::Equal),
                (Value::String(m), Value::String(n)) => m.cmp(n),
                _ => x.to_string().cmp(&y.to_string()),
            };
            if order.ascending {
                ord
            } else {
                ord.reverse()
            }
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn fetch_rows(&self, query: &CollectionQuery) -> RemoteResult<Vec<Value>> {
        self.begin(StoreOp::Fetch, &query.table)?;
        self.gate_fetch().await;

        let mut rows: Vec<Value> = {
            let state = self.state.lock().expect("lock poisoned");
            state
                .tables
                .get(&query.table)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| query.filter.as_ref().map_or(true, |f| f.matches(row)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        if let Some(order) = &query.order {
            rows.sort_by(|a, b| compare_rows(a, b, order));
        }
        debug!(table = %query.table, count = rows.len(), "Fetched rows");
        Ok(rows)
    }

    async fn insert_row(&self, table: &str, row: Value) -> RemoteResult<Value> {
        self.begin(StoreOp::Insert, table)?;
        let mut row = as_object(table, row)?;

        let id = match row.get("id") {
            Some(Value::String(id)) => id.clone(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        row.insert("id".to_string(), Value::String(id.clone()));
        row.entry("created_at".to_string())
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        let row = Value::Object(row);

        {
            let mut state = self.state.lock().expect("lock poisoned");
            let rows = state.tables.entry(table.to_string()).or_default();
            if rows.iter().any(|r| EqFilter::id(id.as_str()).matches(r)) {
                return Err(RemoteError::Conflict(format!("{} id {} exists", table, id)));
            }
            rows.push(row.clone());
        }

        self.emit(table, ChangeKind::Insert, Some(row.clone()), None);
        Ok(row)
    }

    async fn update_rows(
        &self,
        table: &str,
        filter: &EqFilter,
        patch: Value,
    ) -> RemoteResult<Vec<Value>> {
        self.begin(StoreOp::Update, table)?;
        let patch = as_object(table, patch)?;

        let mut changed = Vec::new();
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if let Some(rows) = state.tables.get_mut(table) {
                for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                    let old = row.clone();
                    if let Value::Object(fields) = row {
                        for (k, v) in &patch {
                            fields.insert(k.clone(), v.clone());
                        }
                    }
                    changed.push((old, row.clone()));
                }
            }
        }

        let mut updated = Vec::with_capacity(changed.len());
        for (old, new) in changed {
            self.emit(table, ChangeKind::Update, Some(new.clone()), Some(old));
            updated.push(new);
        }
        Ok(updated)
    }

    async fn delete_rows(&self, table: &str, filter: &EqFilter) -> RemoteResult<Vec<Value>> {
        self.begin(StoreOp::Delete, table)?;

        let removed: Vec<Value> = {
            let mut state = self.state.lock().expect("lock poisoned");
            match state.tables.get_mut(table) {
                Some(rows) => {
                    let (gone, kept): (Vec<Value>, Vec<Value>) =
                        rows.drain(..).partition(|r| filter.matches(r));
                    *rows = kept;
                    gone
                }
                None => Vec::new(),
            }
        };

        for old in &removed {
            self.emit(table, ChangeKind::Delete, None, Some(old.clone()));
        }
        Ok(removed)
    }

    async fn call_procedure(&self, name: &str, _args: Value) -> RemoteResult<Vec<Value>> {
        self.begin(StoreOp::Procedure, name)?;
        let state = self.state.lock().expect("lock poisoned");
        state
            .procedures
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("procedure {}", name)))
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> RemoteResult<String> {
        let key = object_key(bucket, path);
        self.begin(StoreOp::Upload, &key)?;
        if bytes.len() > self.max_object_bytes {
            return Err(RemoteError::TooLarge {
                size: bytes.len(),
                limit: self.max_object_bytes,
            });
        }
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.objects.contains_key(&key) {
                return Err(RemoteError::Conflict(format!("object {} exists", key)));
            }
            state.objects.insert(key, bytes);
        }
        Ok(self.public_url(bucket, path))
    }

    async fn remove_object(&self, bucket: &str, path: &str) -> RemoteResult<()> {
        let key = object_key(bucket, path);
        self.begin(StoreOp::RemoveObject, &key)?;
        let mut state = self.state.lock().expect("lock poisoned");
        match state.objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(key)),
        }
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn tasks_query() -> CollectionQuery {
        CollectionQuery::new("tasks").order(SortOrder::asc("due_date"))
    }

    #[tokio::test]
    async fn insert_assigns_id_and_created_at() {
        let store = InMemoryStore::new();
        let row = store
            .insert_row("messages", json!({ "content": "hi" }))
            .await
            .unwrap();

        assert!(row["id"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(row["created_at"].is_string());
        assert_eq!(store.rows("messages").len(), 1);
    }

    #[tokio::test]
    async fn fetch_filters_and_orders_nulls_last() {
        let store = InMemoryStore::new();
        store.seed(
            "tasks",
            vec![
                json!({ "id": "a", "due_date": null }),
                json!({ "id": "b", "due_date": "2024-02-01" }),
                json!({ "id": "c", "due_date": "2024-01-01" }),
            ],
        );

        let rows = store.fetch_rows(&tasks_query()).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let filtered = store
            .fetch_rows(&CollectionQuery::new("tasks").filter(EqFilter::id("b")))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn injected_fault_fails_only_the_next_call() {
        let store = InMemoryStore::new();
        store.fail_next(StoreOp::Fetch, ErrorKind::Transport);

        let err = store.fetch_rows(&tasks_query()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(store.fetch_rows(&tasks_query()).await.is_ok());
        assert_eq!(store.count(StoreOp::Fetch), 2);
    }

    #[tokio::test]
    async fn writes_are_broadcast() {
        let store = InMemoryStore::new();
        let mut changes = store.changes();

        let row = store
            .insert_row("notifications", json!({ "read": false }))
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap().to_string();
        store
            .update_rows("notifications", &EqFilter::id(&id), json!({ "read": true }))
            .await
            .unwrap();
        store
            .delete_rows("notifications", &EqFilter::id(&id))
            .await
            .unwrap();

        assert_eq!(changes.recv().await.unwrap().kind, ChangeKind::Insert);
        let update = changes.recv().await.unwrap();
        assert_eq!(update.kind, ChangeKind::Update);
        assert_eq!(update.record.unwrap()["read"], json!(true));
        assert_eq!(update.old_record.unwrap()["read"], json!(false));
        let delete = changes.recv().await.unwrap();
        assert_eq!(delete.kind, ChangeKind::Delete);
        assert!(delete.record.is_none());
    }

    #[tokio::test]
    async fn delete_of_missing_row_returns_empty() {
        let store = InMemoryStore::new();
        let removed = store
            .delete_rows("task_attachments", &EqFilter::id("nope"))
            .await
            .unwrap();
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn object_limits_and_conflicts() {
        let store = InMemoryStore::new().with_max_object_bytes(4);

        let err = store
            .upload_object("b", "x.bin", vec![0; 5], "application/octet-stream")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Quota);

        let url = store
            .upload_object("b", "x.bin", vec![0; 4], "application/octet-stream")
            .await
            .unwrap();
        assert_eq!(url, "http://store.local/storage/v1/object/public/b/x.bin");
        assert_eq!(store.object_path("b", &url).as_deref(), Some("x.bin"));

        let err = store
            .upload_object("b", "x.bin", vec![0; 1], "application/octet-stream")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        store.remove_object("b", "x.bin").await.unwrap();
        let err = store.remove_object("b", "x.bin").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn held_fetches_wait_for_release() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("tasks", vec![json!({ "id": "a" })]);
        store.hold_fetches();

        let pending = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.fetch_rows(&tasks_query()).await })
        };
        store.wait_for_held_fetches(1).await;
        assert_eq!(store.held_fetches(), 1);
        assert!(!pending.is_finished());

        assert!(store.release_fetch());
        let rows = pending.await.unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!store.release_fetch());

        store.resume_fetches();
        assert!(store.fetch_rows(&tasks_query()).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_procedure_is_not_found() {
        let store = InMemoryStore::new();
        store.set_procedure("get_workspace_members", vec![json!({ "user_id": "u1" })]);

        let rows = store
            .call_procedure("get_workspace_members", json!({ "workspace_id": "w" }))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let err = store.call_procedure("nope", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
