//! Operations the workflow needs from the statement-processing backend.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::{FilePreview, FileUploadResponse, TaskStatus};

/// Upload progress callback, called with 0..=100 as bytes go out.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// File content handed to the upload transport.
#[derive(Clone, Debug)]
pub struct UploadSource {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Backend collaborator. Implemented over HTTP by [`super::client::HttpBackend`].
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Obtain and cache a bearer token for the session.
    async fn login(&self, username: &str, password: &str) -> Result<()>;

    /// Upload one file and return the backend record.
    async fn upload_file(
        &self,
        source: UploadSource,
        progress: ProgressFn,
    ) -> Result<FileUploadResponse>;

    /// Sheets and automatic statement detections of an uploaded file.
    async fn get_preview(&self, file_id: &str) -> Result<FilePreview>;

    /// Start processing and return the backend task id.
    async fn start_processing(&self, file_id: &str, options: &Map<String, Value>)
    -> Result<String>;

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus>;

    /// Ask the backend to stop processing a file; returns its message.
    async fn cancel_processing(&self, file_id: &str) -> Result<String>;
}
