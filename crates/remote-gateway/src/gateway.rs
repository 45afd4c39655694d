//! Typed façade over a [`RemoteStore`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};
use crate::query::{CollectionQuery, EqFilter};
use crate::records::Record;
use crate::store::RemoteStore;

/// Record-typed access to the remote store. Cheap to clone.
#[derive(Clone)]
pub struct RemoteGateway {
    store: Arc<dyn RemoteStore>,
}

impl RemoteGateway {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// The underlying untyped store.
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Fetch every `R` row matching `filter`, in the record's server order.
    pub async fn fetch_collection<R: Record>(&self, filter: Option<EqFilter>) -> RemoteResult<Vec<R>> {
        let query = CollectionQuery::new(R::TABLE)
            .maybe_filter(filter)
            .order(R::ORDER);
        let rows = self.store.fetch_rows(&query).await?;
        decode_rows(rows)
    }

    /// Insert `new` into `R`'s table and return the created record.
    pub async fn insert<R: Record>(&self, new: &impl Serialize) -> RemoteResult<R> {
        let row = serde_json::to_value(new)?;
        let created = self.store.insert_row(R::TABLE, row).await?;
        let record = R::from_row(created)?;
        debug!(table = R::TABLE, id = record.id(), "Inserted record");
        Ok(record)
    }

    /// Apply `patch` to the record with `id`. Fails with `NotFound` when no row matched.
    pub async fn update<R: Record>(&self, id: &str, patch: Value) -> RemoteResult<R> {
        let rows = self
            .store
            .update_rows(R::TABLE, &EqFilter::id(id), patch)
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(format!("{} {}", R::TABLE, id)))?;
        R::from_row(row)
    }

    /// Delete the record with `id`. Returns whether a row was removed.
    pub async fn remove<R: Record>(&self, id: &str) -> RemoteResult<bool> {
        let removed = self.store.delete_rows(R::TABLE, &EqFilter::id(id)).await?;
        debug!(table = R::TABLE, id, removed = removed.len(), "Removed record");
        Ok(!removed.is_empty())
    }

    /// Call a set-returning procedure and decode its rows as `R`.
    pub async fn call_procedure<R: Record>(&self, name: &str, args: Value) -> RemoteResult<Vec<R>> {
        let rows = self.store.call_procedure(name, args).await?;
        decode_rows(rows)
    }

    pub async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> RemoteResult<String> {
        self.store
            .upload_object(bucket, path, bytes, content_type)
            .await
    }

    pub async fn remove_object(&self, bucket: &str, path: &str) -> RemoteResult<()> {
        self.store.remove_object(bucket, path).await
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        self.store.public_url(bucket, path)
    }

    pub fn object_path(&self, bucket: &str, url: &str) -> Option<String> {
        self.store.object_path(bucket, url)
    }
}

impl std::fmt::Debug for RemoteGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteGateway").finish_non_exhaustive()
    }
}

/// One malformed row fails the whole batch.
fn decode_rows<R: Record>(rows: Vec<Value>) -> RemoteResult<Vec<R>> {
    rows.into_iter().map(R::from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, StoreOp};
    use crate::records::{Message, NewMessage, Notification, TeamMember};
    use crate::ErrorKind;
    use serde_json::json;

    fn gateway() -> (Arc<InMemoryStore>, RemoteGateway) {
        let store = Arc::new(InMemoryStore::new());
        let gateway = RemoteGateway::new(store.clone());
        (store, gateway)
    }

    #[tokio::test]
    async fn insert_then_fetch_typed() {
        let (_store, gateway) = gateway();
        let sent: Message = gateway
            .insert::<Message>(&NewMessage {
                content: "hello".to_string(),
                sender_id: "me".to_string(),
                recipient_id: "you".to_string(),
                read: false,
            })
            .await
            .unwrap();
        assert_eq!(sent.content, "hello");

        let messages: Vec<Message> = gateway.fetch_collection(None).await.unwrap();
        assert_eq!(messages, vec![sent]);
    }

    #[tokio::test]
    async fn malformed_row_is_a_data_error() {
        let (store, gateway) = gateway();
        store.seed("notifications", vec![json!({ "id": "n1", "title": "x" })]);

        let err = gateway
            .fetch_collection::<Notification>(None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[tokio::test]
    async fn null_description_does_not_fail_the_fetch() {
        let (store, gateway) = gateway();
        store.seed(
            "tasks",
            vec![
                json!({ "id": "t1", "title": "a", "description": null, "status": "todo", "priority": "low" }),
                json!({ "id": "t2", "title": "b", "description": "x", "status": "todo", "priority": "low" }),
            ],
        );

        let tasks = gateway.fetch_collection::<crate::Task>(None).await.unwrap();
        assert_eq!(tasks.len(), 2);
        let t1 = tasks.iter().find(|t| t.id == "t1").unwrap();
        assert_eq!(t1.description, "");
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let (_store, gateway) = gateway();
        let err = gateway
            .update::<Notification>("missing", json!({ "read": true }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn remove_reports_whether_a_row_went_away() {
        let (store, gateway) = gateway();
        store.seed("tasks", vec![json!({ "id": "t1" })]);

        assert!(gateway.remove::<crate::Task>("t1").await.unwrap());
        assert!(!gateway.remove::<crate::Task>("t1").await.unwrap());
        assert_eq!(store.count(StoreOp::Delete), 2);
    }

    #[tokio::test]
    async fn procedure_rows_are_decoded() {
        let (store, gateway) = gateway();
        store.set_procedure(
            "get_workspace_members",
            vec![json!({
                "user_id": "u1",
                "role": "admin",
                "email": "u1@example.com",
                "joined_at": "2024-01-01T00:00:00Z",
            })],
        );

        let members: Vec<TeamMember> = gateway
            .call_procedure("get_workspace_members", json!({ "workspace_id": "w1" }))
            .await
            .unwrap();
        assert_eq!(members[0].user_id, "u1");
    }
}
