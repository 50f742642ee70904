//! Scripted in-memory backend for workflow tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::api::{BackendApi, ProgressFn, UploadSource};
use crate::models::{FilePreview, FileUploadResponse, RemoteTaskState, TaskStatus};

/// Backend double whose answers are queued up front by the test.
#[derive(Default)]
pub struct FakeBackend {
    /// Upload errors by filename; other files succeed.
    pub upload_failures: Mutex<HashMap<String, String>>,
    pub previews: Mutex<HashMap<String, FilePreview>>,
    pub start_results: Mutex<VecDeque<Result<String, String>>>,
    /// Status answers in order; an empty queue answers "still processing".
    pub statuses: Mutex<VecDeque<Result<TaskStatus, String>>>,
    pub cancel_fails: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_upload(self, filename: &str, message: &str) -> Self {
        self.upload_failures
            .lock()
            .unwrap()
            .insert(filename.into(), message.into());
        self
    }

    pub fn with_preview(self, file_id: &str, preview: FilePreview) -> Self {
        self.previews
            .lock()
            .unwrap()
            .insert(file_id.into(), preview);
        self
    }

    pub fn with_start(self, result: Result<&str, &str>) -> Self {
        self.start_results
            .lock()
            .unwrap()
            .push_back(result.map(String::from).map_err(String::from));
        self
    }

    pub fn with_status(self, state: RemoteTaskState, progress: f64) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .push_back(Ok(status(state, progress)));
        self
    }

    pub fn with_poll_error(self, message: &str) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .push_back(Err(message.into()));
        self
    }

    /// Recorded calls such as `status:task-1` or `cancel:f-1`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Status payload with a step label derived from the progress.
pub fn status(state: RemoteTaskState, progress: f64) -> TaskStatus {
    TaskStatus {
        status: state,
        progress,
        current_step: Some(format!("step at {progress}")),
        error: (state == RemoteTaskState::Failure).then(|| "parser crashed".to_string()),
        result: (state == RemoteTaskState::Success).then(|| serde_json::json!({"statements": 3})),
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn login(&self, username: &str, _password: &str) -> Result<()> {
        self.record(format!("login:{username}"));
        Ok(())
    }

    async fn upload_file(
        &self,
        source: UploadSource,
        progress: ProgressFn,
    ) -> Result<FileUploadResponse> {
        self.record(format!("upload:{}", source.filename));
        for pct in [25, 50, 100] {
            progress(pct);
            tokio::task::yield_now().await;
        }
        if let Some(msg) = self.upload_failures.lock().unwrap().get(&source.filename) {
            return Err(anyhow!("{msg}"));
        }
        Ok(FileUploadResponse {
            id: format!("id-{}", source.filename),
            original_filename: source.filename,
            file_size: source.bytes.len() as u64,
            status: "uploaded".into(),
        })
    }

    async fn get_preview(&self, file_id: &str) -> Result<FilePreview> {
        self.record(format!("preview:{file_id}"));
        self.previews
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| anyhow!("HTTP status 404 Not Found error: file {file_id}"))
    }

    async fn start_processing(&self, file_id: &str, _options: &Map<String, Value>) -> Result<String> {
        self.record(format!("start:{file_id}"));
        match self.start_results.lock().unwrap().pop_front() {
            Some(Ok(task)) => Ok(task),
            Some(Err(msg)) => Err(anyhow!("{msg}")),
            None => Ok("task-default".into()),
        }
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus> {
        self.record(format!("status:{task_id}"));
        match self.statuses.lock().unwrap().pop_front() {
            Some(Ok(s)) => Ok(s),
            Some(Err(msg)) => Err(anyhow!("{msg}")),
            None => Ok(status(RemoteTaskState::Processing, 0.0)),
        }
    }

    async fn cancel_processing(&self, file_id: &str) -> Result<String> {
        self.record(format!("cancel:{file_id}"));
        if self.cancel_fails {
            return Err(anyhow!("connection reset"));
        }
        Ok("cancelled".into())
    }
}
