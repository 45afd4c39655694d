//! The untyped store contract every backend implements.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteResult;
use crate::query::{CollectionQuery, EqFilter};

/// JSON-row access to the remote tables, procedures and object storage.
///
/// Every call is a single request/response. Implementations hold no
/// client-side state about rows and never retry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read the rows selected by `query`, in the requested order.
    async fn fetch_rows(&self, query: &CollectionQuery) -> RemoteResult<Vec<Value>>;

    /// Insert one row and return it as created (server defaults applied).
    async fn insert_row(&self, table: &str, row: Value) -> RemoteResult<Value>;

    /// Merge `patch` into every row matching `filter`; returns the updated rows.
    async fn update_rows(&self, table: &str, filter: &EqFilter, patch: Value)
        -> RemoteResult<Vec<Value>>;

    /// Delete every row matching `filter`; returns the deleted rows.
    async fn delete_rows(&self, table: &str, filter: &EqFilter) -> RemoteResult<Vec<Value>>;

    /// Invoke a row procedure returning a set of rows.
    async fn call_procedure(&self, name: &str, args: Value) -> RemoteResult<Vec<Value>>;

    /// Store `bytes` at `bucket/path`; returns the object's public URL.
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> RemoteResult<String>;

    /// Delete the object at `bucket/path`.
    async fn remove_object(&self, bucket: &str, path: &str) -> RemoteResult<()>;

    /// Stable public URL for `bucket/path`. Pure, no network call.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Inverse of [`RemoteStore::public_url`]: the object path inside `bucket`,
    /// or `None` when `url` does not point into that bucket.
    fn object_path(&self, bucket: &str, url: &str) -> Option<String> {
        let prefix = self.public_url(bucket, "");
        url.strip_prefix(&prefix)
            .map(|path| path.split(['?', '#']).next().unwrap_or_default())
            .filter(|path| !path.is_empty())
            .map(str::to_string)
    }
}
