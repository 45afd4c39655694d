//! Supabase REST, RPC and storage client.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::error::{RemoteError, RemoteResult};
use crate::query::{CollectionQuery, EqFilter};
use crate::store::RemoteStore;

/// [`RemoteStore`] backed by a Supabase project.
#[derive(Clone)]
pub struct SupabaseStore {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl SupabaseStore {
    /// Create a new Supabase store.
    ///
    /// # Arguments
    /// * `api_url` - The project API URL (e.g., `https://xyz.supabase.co`)
    /// * `anon_key` - The anonymous API key
    pub fn new(api_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the user access token (call after authentication).
    ///
    /// Until set, requests authenticate with the anon key.
    pub async fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write().await = Some(token.into());
    }

    /// Clear the user access token (call on logout).
    pub async fn clear_access_token(&self) {
        *self.access_token.write().await = None;
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    fn rpc_url(&self, name: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.api_url, name)
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.api_url, bucket, path)
    }

    async fn bearer(&self) -> String {
        let token = self.access_token.read().await.clone();
        format!("Bearer {}", token.unwrap_or_else(|| self.anon_key.clone()))
    }

    async fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", self.bearer().await)
    }

    /// Send a JSON-bodied request expecting a JSON array back.
    async fn send_for_rows<T: Serialize + ?Sized>(
        &self,
        builder: reqwest::RequestBuilder,
        body: Option<&T>,
    ) -> RemoteResult<Vec<Value>> {
        let builder = match body {
            Some(body) => builder.json(body),
            None => builder,
        };
        let response = check_response(builder.send().await?).await?;
        let value: Value = response.json().await?;
        Ok(match value {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            single => vec![single],
        })
    }
}

/// Check HTTP response for errors.
///
/// Storage endpoints sometimes answer 400 with the real status in the
/// body's `statusCode` field; that value wins when present.
async fn check_response(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let status = embedded_status(&body).unwrap_or(status);
    error!(status, body = %body, "Supabase request failed");
    Err(RemoteError::Status {
        status,
        message: body,
    })
}

fn embedded_status(body: &str) -> Option<u16> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("statusCode")? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        _ => None,
    }
}

#[async_trait]
impl RemoteStore for SupabaseStore {
    async fn fetch_rows(&self, query: &CollectionQuery) -> RemoteResult<Vec<Value>> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        if let Some(filter) = &query.filter {
            params.push(filter.to_query_pair());
        }
        if let Some(order) = &query.order {
            params.push(("order".to_string(), order.to_query_value()));
        }

        debug!(table = %query.table, filter = ?query.filter, "Fetching collection");

        let builder = self
            .request(reqwest::Method::GET, &self.rest_url(&query.table))
            .await
            .query(&params);
        let rows = self.send_for_rows::<Value>(builder, None).await?;

        debug!(table = %query.table, count = rows.len(), "Collection fetched");
        Ok(rows)
    }

    async fn insert_row(&self, table: &str, row: Value) -> RemoteResult<Value> {
        debug!(table, "Inserting row");

        let builder = self
            .request(reqwest::Method::POST, &self.rest_url(table))
            .await
            .header("Prefer", "return=representation");
        let rows = self.send_for_rows(builder, Some(&[row])).await?;

        rows.into_iter().next().ok_or_else(|| RemoteError::Decode {
            table: table.to_string(),
            message: "insert returned no row".to_string(),
        })
    }

    async fn update_rows(
        &self,
        table: &str,
        filter: &EqFilter,
        patch: Value,
    ) -> RemoteResult<Vec<Value>> {
        debug!(table, %filter, "Updating rows");

        let builder = self
            .request(reqwest::Method::PATCH, &self.rest_url(table))
            .await
            .query(&[filter.to_query_pair()])
            .header("Prefer", "return=representation");
        self.send_for_rows(builder, Some(&patch)).await
    }

    async fn delete_rows(&self, table: &str, filter: &EqFilter) -> RemoteResult<Vec<Value>> {
        debug!(table, %filter, "Deleting rows");

        let builder = self
            .request(reqwest::Method::DELETE, &self.rest_url(table))
            .await
            .query(&[filter.to_query_pair()])
            .header("Prefer", "return=representation");
        self.send_for_rows::<Value>(builder, None).await
    }

    async fn call_procedure(&self, name: &str, args: Value) -> RemoteResult<Vec<Value>> {
        debug!(procedure = name, "Calling row procedure");

        let builder = self
            .request(reqwest::Method::POST, &self.rpc_url(name))
            .await;
        self.send_for_rows(builder, Some(&args)).await
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> RemoteResult<String> {
        let size = bytes.len();
        debug!(bucket, path, size, "Uploading object");

        let response = self
            .request(reqwest::Method::POST, &self.object_url(bucket, path))
            .await
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        check_response(response).await?;

        debug!(bucket, path, "Object uploaded");
        Ok(self.public_url(bucket, path))
    }

    async fn remove_object(&self, bucket: &str, path: &str) -> RemoteResult<()> {
        debug!(bucket, path, "Removing object");

        let url = format!("{}/storage/v1/object/{}", self.api_url, bucket);
        let builder = self.request(reqwest::Method::DELETE, &url).await;
        let body = serde_json::json!({ "prefixes": [path] });
        let removed = self.send_for_rows(builder, Some(&body)).await?;

        if removed.is_empty() {
            return Err(RemoteError::NotFound(format!("{}/{}", bucket, path)));
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.api_url, bucket, path
        )
    }
}

impl std::fmt::Debug for SupabaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_store_creation_trims_trailing_slash() {
        let store = SupabaseStore::new("https://test.supabase.co/", "test-key");
        assert_eq!(store.api_url, "https://test.supabase.co");
        assert_eq!(store.anon_key, "test-key");
    }

    #[test]
    fn test_endpoint_urls() {
        let store = SupabaseStore::new("https://test.supabase.co", "test-key");
        assert_eq!(
            store.rest_url("tasks"),
            "https://test.supabase.co/rest/v1/tasks"
        );
        assert_eq!(
            store.rpc_url("get_workspace_members"),
            "https://test.supabase.co/rest/v1/rpc/get_workspace_members"
        );
        assert_eq!(
            store.object_url("task-attachments", "T1/a.pdf"),
            "https://test.supabase.co/storage/v1/object/task-attachments/T1/a.pdf"
        );
    }

    #[test]
    fn test_public_url_and_object_path_are_inverse() {
        let store = SupabaseStore::new("https://test.supabase.co", "test-key");
        let url = store.public_url("task-attachments", "T1/abc.pdf");
        assert_eq!(
            url,
            "https://test.supabase.co/storage/v1/object/public/task-attachments/T1/abc.pdf"
        );
        assert_eq!(
            store.object_path("task-attachments", &url).as_deref(),
            Some("T1/abc.pdf")
        );
        assert!(store.object_path("avatars", &url).is_none());
    }

    #[test]
    fn test_embedded_storage_status() {
        assert_eq!(
            embedded_status(r#"{"statusCode":"404","error":"not_found"}"#),
            Some(404)
        );
        assert_eq!(embedded_status(r#"{"statusCode":413}"#), Some(413));
        assert_eq!(embedded_status("plain text"), None);

        let err = RemoteError::Status {
            status: embedded_status(r#"{"statusCode":"413"}"#).unwrap(),
            message: String::new(),
        };
        assert_eq!(err.kind(), ErrorKind::Quota);
    }

    #[tokio::test]
    async fn test_bearer_prefers_access_token() {
        let store = SupabaseStore::new("https://test.supabase.co", "anon");
        assert_eq!(store.bearer().await, "Bearer anon");

        store.set_access_token("user-token").await;
        assert_eq!(store.bearer().await, "Bearer user-token");

        store.clear_access_token().await;
        assert_eq!(store.bearer().await, "Bearer anon");
    }
}
