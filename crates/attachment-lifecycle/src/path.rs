//! Storage path and file metadata derivation.
//!
//! Nothing from the user-supplied file name reaches the storage path except
//! a sanitized extension.

use uuid::Uuid;

const MAX_EXTENSION_LEN: usize = 16;
const FALLBACK_EXTENSION: &str = "bin";

/// Lowercased extension of `file_name` if it is short ASCII alphanumeric.
pub fn sanitize_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// `{task_id}/{uuid}.{ext}`; a random name so uploads never collide.
pub fn storage_path(task_id: &str, file_name: &str) -> String {
    let ext = sanitize_extension(file_name).unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
    format!("{}/{}.{}", task_id, Uuid::new_v4(), ext)
}

/// Value stored in the `file_type` column.
pub fn file_type(file_name: &str) -> String {
    sanitize_extension(file_name).unwrap_or_else(|| "unknown".to_string())
}

pub fn content_type_for(file_name: &str) -> &'static str {
    match sanitize_extension(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
