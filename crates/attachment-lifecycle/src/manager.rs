//! Attachment manager.

use std::collections::HashMap;
use std::sync::Mutex;

use collection_sync::RefreshHandle;
use remote_gateway::{ErrorKind, NewTaskAttachment, RemoteGateway, TaskAttachment};
use tracing::{debug, info, warn};

use crate::error::{AttachError, AttachResult};
use crate::path::{content_type_for, file_type, storage_path};

/// Default storage bucket for attachments.
pub const DEFAULT_BUCKET: &str = "task-attachments";

/// Default upload limit (5 MB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AttachmentManagerConfig {
    pub bucket: String,
    pub max_upload_bytes: usize,
}

impl Default for AttachmentManagerConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Owns no snapshot. Writes through the gateway, then asks every tracked
/// attachments synchronizer for the task to refresh.
pub struct AttachmentManager {
    gateway: RemoteGateway,
    config: AttachmentManagerConfig,
    tracked: Mutex<HashMap<String, Vec<RefreshHandle>>>,
}

impl AttachmentManager {
    pub fn new(gateway: RemoteGateway, config: AttachmentManagerConfig) -> Self {
        Self {
            gateway,
            config,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AttachmentManagerConfig {
        &self.config
    }

    /// Register a synchronizer showing `task_id`'s attachments.
    pub fn track(&self, task_id: impl Into<String>, handle: RefreshHandle) {
        let mut tracked = self.tracked.lock().expect("lock poisoned");
        let handles = tracked.entry(task_id.into()).or_default();
        handles.retain(|h| !h.is_closed());
        handles.push(handle);
    }

    /// Forget the closed synchronizers tracked for `task_id`. Returns how
    /// many are still open.
    pub fn untrack(&self, task_id: &str) -> usize {
        let mut tracked = self.tracked.lock().expect("lock poisoned");
        let Some(handles) = tracked.get_mut(task_id) else {
            return 0;
        };
        handles.retain(|h| !h.is_closed());
        let open = handles.len();
        if open == 0 {
            tracked.remove(task_id);
        }
        debug!(task_id, open, "Untracked attachments synchronizers");
        open
    }

    pub fn is_tracked(&self, task_id: &str) -> bool {
        self.tracked.lock().expect("lock poisoned").contains_key(task_id)
    }

    /// Upload `bytes` and record them as an attachment of `task_id`.
    pub async fn attach(
        &self,
        task_id: &str,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> AttachResult<TaskAttachment> {
        validate_task_id(task_id)?;
        let size = bytes.len();
        if size > self.config.max_upload_bytes {
            debug!(task_id, size, "Attachment over size limit");
            return Err(AttachError::TooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }

        let bucket = self.config.bucket.as_str();
        let path = storage_path(task_id, file_name);
        info!(task_id, path = %path, size, "Uploading attachment");

        self.gateway
            .upload_object(bucket, &path, bytes, content_type_for(file_name))
            .await
            .map_err(AttachError::Upload)?;
        let file_url = self.gateway.public_url(bucket, &path);

        let new = NewTaskAttachment {
            task_id: task_id.to_string(),
            name: file_name.to_string(),
            file_url,
            file_type: file_type(file_name),
        };
        let record = match self.gateway.insert::<TaskAttachment>(&new).await {
            Ok(record) => record,
            Err(source) => {
                warn!(task_id, bucket, path = %path, error = %source, "Attachment row insert failed; object orphaned");
                return Err(AttachError::Record { path, source });
            }
        };

        info!(task_id, id = %record.id, "Attachment recorded");
        self.refresh(task_id);
        Ok(record)
    }

    /// Remove an attachment. Succeeds if the row is already gone.
    pub async fn detach(&self, attachment: &TaskAttachment) -> AttachResult<()> {
        match self.gateway.remove::<TaskAttachment>(&attachment.id).await {
            Ok(true) => info!(id = %attachment.id, "Attachment row removed"),
            Ok(false) => debug!(id = %attachment.id, "Attachment row already gone"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(id = %attachment.id, "Attachment row already gone")
            }
            Err(e) => return Err(AttachError::Remove(e)),
        }

        let bucket = self.config.bucket.as_str();
        match self.gateway.object_path(bucket, &attachment.file_url) {
            Some(path) => match self.gateway.remove_object(bucket, &path).await {
                Ok(()) => debug!(bucket, path = %path, "Attachment object removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(bucket, path = %path, "Attachment object already gone")
                }
                Err(e) => warn!(bucket, path = %path, error = %e, "Attachment object removal failed"),
            },
            None => warn!(
                bucket,
                url = %attachment.file_url,
                "Attachment URL outside bucket; object left in place"
            ),
        }

        self.refresh(&attachment.task_id);
        Ok(())
    }

    fn refresh(&self, task_id: &str) {
        let mut tracked = self.tracked.lock().expect("lock poisoned");
        let Some(handles) = tracked.get_mut(task_id) else {
            return;
        };
        handles.retain(|h| h.refresh());
        if handles.is_empty() {
            debug!(task_id, "No open attachments synchronizer left");
            tracked.remove(task_id);
        }
    }
}

impl std::fmt::Debug for AttachmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn validate_task_id(task_id: &str) -> AttachResult<()> {
    if task_id.is_empty() || task_id == "." || task_id == ".." || task_id.contains(['/', '\\']) {
        return Err(AttachError::Invalid(format!("unusable task id {:?}", task_id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use change_channel::{ChannelHub, LocalTransport, TopicKey};
    use collection_sync::{CollectionSynchronizer, SyncConfig, TableSource};
    use remote_gateway::{EqFilter, InMemoryStore, StoreOp};
    use std::sync::Arc;

    const MB: usize = 1024 * 1024;

    fn manager() -> (Arc<InMemoryStore>, RemoteGateway, AttachmentManager) {
        let store = Arc::new(InMemoryStore::new());
        let gateway = RemoteGateway::new(store.clone());
        let manager = AttachmentManager::new(gateway.clone(), AttachmentManagerConfig::default());
        (store, gateway, manager)
    }

    #[tokio::test]
    async fn attach_uploads_then_records() {
        let (store, gateway, manager) = manager();

        let record = manager.attach("T1", vec![7; 4 * MB], "spec.pdf").await.unwrap();
        assert_eq!(record.task_id, "T1");
        assert_eq!(record.name, "spec.pdf");
        assert_eq!(record.file_type, "pdf");

        let path = gateway.object_path(DEFAULT_BUCKET, &record.file_url).unwrap();
        assert!(store.has_object(DEFAULT_BUCKET, &path));
        assert!(path.starts_with("T1/"));

        let rows: Vec<TaskAttachment> = gateway
            .fetch_collection(Some(EqFilter::new("task_id", "T1")))
            .await
            .unwrap();
        assert_eq!(rows, vec![record]);
    }

    #[tokio::test]
    async fn oversized_file_fails_before_any_call() {
        let (store, _gateway, manager) = manager();

        let err = manager.attach("T1", vec![0; 6 * MB], "big.bin").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Quota);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_insert_orphans_the_object() {
        let (store, _gateway, manager) = manager();
        store.fail_next(StoreOp::Insert, ErrorKind::Conflict);

        let err = manager.attach("T1", vec![1; 10], "a.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(matches!(err, AttachError::Record { .. }));
        assert_eq!(store.objects().len(), 1);
        assert!(store.rows("task_attachments").is_empty());
    }

    #[tokio::test]
    async fn upload_failure_writes_no_row() {
        let (store, _gateway, manager) = manager();
        store.fail_next(StoreOp::Upload, ErrorKind::Transport);

        let err = manager.attach("T1", vec![1; 10], "a.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(store.count(StoreOp::Insert), 0);
    }

    #[tokio::test]
    async fn detach_is_idempotent() {
        let (store, _gateway, manager) = manager();
        let record = manager.attach("T1", vec![1; 10], "a.txt").await.unwrap();

        manager.detach(&record).await.unwrap();
        assert!(store.rows("task_attachments").is_empty());
        assert!(store.objects().is_empty());

        manager.detach(&record).await.unwrap();
    }

    #[tokio::test]
    async fn object_removal_failure_does_not_fail_detach() {
        let (store, _gateway, manager) = manager();
        let record = manager.attach("T1", vec![1; 10], "a.txt").await.unwrap();
        store.fail_next(StoreOp::RemoveObject, ErrorKind::Transport);

        manager.detach(&record).await.unwrap();
        assert!(store.rows("task_attachments").is_empty());
        assert_eq!(store.objects().len(), 1);
    }

    #[tokio::test]
    async fn row_removal_failure_is_returned() {
        let (store, _gateway, manager) = manager();
        let record = manager.attach("T1", vec![1; 10], "a.txt").await.unwrap();
        store.fail_next(StoreOp::Delete, ErrorKind::Transport);

        let err = manager.detach(&record).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(store.count(StoreOp::RemoveObject), 0);
    }

    #[tokio::test]
    async fn unusable_task_ids_are_rejected() {
        let (store, _gateway, manager) = manager();
        for task_id in ["", "..", "a/b"] {
            let err = manager.attach(task_id, vec![1], "a.txt").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn tracked_synchronizer_is_refreshed() {
        let (_store, gateway, manager) = manager();
        let hub = ChannelHub::new(Arc::new(LocalTransport::new()));
        let filter = EqFilter::new("task_id", "T1");
        let sync = CollectionSynchronizer::<TaskAttachment>::mount(
            TableSource::new(gateway, Some(filter.clone())),
            &hub,
            TopicKey::filtered("task_attachments", filter),
            SyncConfig::default(),
        )
        .await;
        sync.wait_until(|v| v.is_ready()).await;
        manager.track("T1", sync.refresh_handle());

        let record = manager.attach("T1", vec![1; 10], "a.txt").await.unwrap();
        let view = sync.wait_until(|v| v.data.len() == 1).await;
        assert_eq!(view.data.records()[0].id, record.id);

        manager.detach(&record).await.unwrap();
        sync.wait_until(|v| v.data.is_empty()).await;

        sync.close().await;
        manager.attach("T1", vec![1; 10], "b.txt").await.unwrap();
        assert!(!manager.is_tracked("T1"));
    }

    #[tokio::test]
    async fn untrack_keeps_views_still_open() {
        let (_store, gateway, manager) = manager();
        let hub = ChannelHub::new(Arc::new(LocalTransport::new()));
        let filter = EqFilter::new("task_id", "T1");
        let mut views = Vec::new();
        for _ in 0..2 {
            let sync = CollectionSynchronizer::<TaskAttachment>::mount(
                TableSource::new(gateway.clone(), Some(filter.clone())),
                &hub,
                TopicKey::filtered("task_attachments", filter.clone()),
                SyncConfig::default(),
            )
            .await;
            manager.track("T1", sync.refresh_handle());
            views.push(sync);
        }

        assert_eq!(manager.untrack("T1"), 2);
        views.pop().unwrap().close().await;
        assert_eq!(manager.untrack("T1"), 1);
        assert!(manager.is_tracked("T1"));

        views.pop().unwrap().close().await;
        assert_eq!(manager.untrack("T1"), 0);
        assert!(!manager.is_tracked("T1"));
        assert_eq!(manager.untrack("T2"), 0);
    }
}
