//! Concurrent file uploads with per-file progress.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinSet};
use uuid::Uuid;

use crate::{
    backend::api::{BackendApi, ProgressFn, UploadSource},
    models::{FileUploadResponse, UploadStatus, UploadedFile},
};

/// Spreadsheet extensions the picker accepts.
const ACCEPTED_EXTENSIONS: [&str; 3] = ["xlsx", "xlsm", "xls"];

/// Rejected coordinator operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("an upload batch is still in progress")]
    BatchInProgress,
    #[error("no files to upload")]
    Empty,
    #[error("no file at row {0}")]
    NoSuchFile(usize),
    #[error("'{0}' is still uploading")]
    StillUploading(String),
}

/// A file on local disk chosen for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
}

impl LocalFile {
    /// Stat a path and capture its display name and size.
    pub fn probe(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let meta = std::fs::metadata(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        if !meta.is_file() {
            anyhow::bail!("{} is not a file", path.display());
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            path,
            filename,
            size_bytes: meta.len(),
        })
    }
}

/// Candidates split the way a drop zone would split them.
#[derive(Debug, Default)]
pub struct Candidates {
    pub accepted: Vec<LocalFile>,
    /// Path and reason.
    pub rejected: Vec<(PathBuf, String)>,
}

/// Check extension and size of each candidate path.
pub fn partition_candidates<P: AsRef<Path>>(paths: &[P], max_bytes: u64) -> Candidates {
    let mut out = Candidates::default();
    for p in paths {
        let p = p.as_ref();
        let ext_ok = p
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| ACCEPTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !ext_ok {
            out.rejected
                .push((p.to_path_buf(), "not an Excel workbook".into()));
            continue;
        }
        match LocalFile::probe(p) {
            Ok(f) if f.size_bytes > max_bytes => out.rejected.push((
                p.to_path_buf(),
                format!("{} bytes exceeds the {} byte limit", f.size_bytes, max_bytes),
            )),
            Ok(f) => out.accepted.push(f),
            Err(e) => out.rejected.push((p.to_path_buf(), e.to_string())),
        }
    }
    out
}

/// Work handed to [`run_batch`]: one item per record created by `start_upload`.
#[derive(Clone, Debug)]
pub struct UploadBatch {
    pub batch_id: u64,
    pub items: Vec<UploadItem>,
}

#[derive(Clone, Debug)]
pub struct UploadItem {
    pub key: Uuid,
    pub file: LocalFile,
}

/// Transport outcome for one record.
#[derive(Clone, Debug)]
pub enum UploadEvent {
    Progress { key: Uuid, percent: u8 },
    Succeeded { key: Uuid, response: FileUploadResponse },
    Failed { key: Uuid, message: String },
}

/// Reported once per batch when every record reached a terminal status.
#[derive(Clone, Debug)]
pub struct UploadSettled {
    pub batch_id: u64,
    /// Records of this batch, in list order.
    pub results: Vec<Arc<UploadedFile>>,
    /// First completed record of the batch, the candidate selection.
    pub first_completed: Option<Arc<UploadedFile>>,
}

/// Owns the upload records for the lifetime of the workflow.
#[derive(Debug, Default)]
pub struct UploadCoordinator {
    files: Vec<Arc<UploadedFile>>,
    /// Keys of the batch still being uploaded, if any.
    open_batch: Option<(u64, Vec<Uuid>)>,
    next_batch_id: u64,
}

impl UploadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create one `uploading` record per file and return the batch to run.
    pub fn start_upload(&mut self, files: Vec<LocalFile>) -> Result<UploadBatch, UploadError> {
        if self.open_batch.is_some() {
            return Err(UploadError::BatchInProgress);
        }
        if files.is_empty() {
            return Err(UploadError::Empty);
        }

        self.next_batch_id += 1;
        let batch_id = self.next_batch_id;
        let mut items = Vec::with_capacity(files.len());
        for file in files {
            let record = UploadedFile::new(file.filename.clone(), file.size_bytes);
            items.push(UploadItem {
                key: record.key,
                file,
            });
            self.files.push(Arc::new(record));
        }
        self.open_batch = Some((batch_id, items.iter().map(|i| i.key).collect()));
        tracing::info!("upload batch {batch_id} started with {} files", items.len());
        Ok(UploadBatch { batch_id, items })
    }

    /// Apply one transport event; returns the batch summary once it settles.
    pub fn apply(&mut self, event: UploadEvent) -> Option<UploadSettled> {
        match event {
            UploadEvent::Progress { key, percent } => {
                if let Some(rec) = self.uploading_mut(key) {
                    let percent = percent.min(100);
                    if percent > rec.progress_percent {
                        rec.progress_percent = percent;
                    }
                }
                None
            }
            UploadEvent::Succeeded { key, response } => {
                let rec = self.uploading_mut(key)?;
                rec.status = UploadStatus::Completed;
                rec.progress_percent = 100;
                rec.id = Some(response.id);
                tracing::info!("upload completed: {}", rec.original_filename);
                self.settle_if_done()
            }
            UploadEvent::Failed { key, message } => {
                let rec = self.uploading_mut(key)?;
                rec.status = UploadStatus::Error;
                tracing::warn!("upload failed: {}: {message}", rec.original_filename);
                rec.error_message = Some(message);
                self.settle_if_done()
            }
        }
    }

    pub fn files(&self) -> &[Arc<UploadedFile>] {
        &self.files
    }

    pub fn get(&self, index: usize) -> Option<&Arc<UploadedFile>> {
        self.files.get(index)
    }

    pub fn is_uploading(&self) -> bool {
        self.open_batch.is_some()
    }

    pub fn has_completed(&self) -> bool {
        self.files
            .iter()
            .any(|f| f.status == UploadStatus::Completed)
    }

    /// True when nothing succeeded and at least one file failed.
    pub fn only_failures(&self) -> bool {
        !self.is_uploading()
            && !self.has_completed()
            && self.files.iter().any(|f| f.status == UploadStatus::Error)
    }

    /// Drop one row from the list. The server-side file is left alone.
    pub fn remove_file(&mut self, index: usize) -> Result<Arc<UploadedFile>, UploadError> {
        let rec = self.files.get(index).ok_or(UploadError::NoSuchFile(index))?;
        if rec.status == UploadStatus::Uploading {
            return Err(UploadError::StillUploading(rec.original_filename.clone()));
        }
        Ok(self.files.remove(index))
    }

    /// Drop every completed row.
    pub fn clear_completed(&mut self) {
        self.files.retain(|f| f.status != UploadStatus::Completed);
    }

    /// Forget everything (workflow reset). Events of a running batch are ignored afterwards.
    pub fn clear(&mut self) {
        self.files.clear();
        self.open_batch = None;
    }

    /// Mutable access to a record that is still uploading.
    fn uploading_mut(&mut self, key: Uuid) -> Option<&mut UploadedFile> {
        self.files
            .iter_mut()
            .find(|f| f.key == key && f.status == UploadStatus::Uploading)
            .map(Arc::make_mut)
    }

    fn settle_if_done(&mut self) -> Option<UploadSettled> {
        let (batch_id, keys) = self.open_batch.as_ref()?;
        let results: Vec<Arc<UploadedFile>> = keys
            .iter()
            .filter_map(|k| self.files.iter().find(|f| f.key == *k).cloned())
            .collect();
        if results.iter().any(|f| !f.is_settled()) {
            return None;
        }
        let first_completed = results
            .iter()
            .find(|f| f.status == UploadStatus::Completed)
            .cloned();
        let batch_id = *batch_id;
        self.open_batch = None;
        tracing::info!(
            "upload batch {batch_id} settled: {} ok, {} failed",
            results
                .iter()
                .filter(|f| f.status == UploadStatus::Completed)
                .count(),
            results
                .iter()
                .filter(|f| f.status == UploadStatus::Error)
                .count()
        );
        Some(UploadSettled {
            batch_id,
            results,
            first_completed,
        })
    }
}

/// Upload every item of a batch at once and report back through `tx`.
///
/// Each file settles independently; a failure never touches its siblings.
pub async fn run_batch<E>(api: Arc<dyn BackendApi>, batch: UploadBatch, tx: mpsc::Sender<E>)
where
    E: From<UploadEvent> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for item in batch.items {
        let api = api.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            let key = item.key;
            let progress_tx = tx.clone();
            let progress: ProgressFn = Arc::new(move |percent| {
                // A full channel only drops an intermediate progress value.
                let _ = progress_tx.try_send(E::from(UploadEvent::Progress { key, percent }));
            });
            let event = match upload_one(api.as_ref(), &item.file, progress).await {
                Ok(response) => UploadEvent::Succeeded { key, response },
                Err(e) => UploadEvent::Failed {
                    key,
                    message: format!("{e:#}"),
                },
            };
            let _ = tx.send(E::from(event)).await;
        });
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!("upload task aborted: {e}");
        }
    }
}

async fn upload_one(
    api: &dyn BackendApi,
    file: &LocalFile,
    progress: ProgressFn,
) -> Result<FileUploadResponse> {
    let bytes = tokio::fs::read(&file.path)
        .await
        .with_context(|| format!("cannot read {}", file.path.display()))?;
    api.upload_file(
        UploadSource {
            filename: file.filename.clone(),
            bytes,
        },
        progress,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FakeBackend;

    fn local(name: &str, size: u64) -> LocalFile {
        LocalFile {
            path: PathBuf::from(name),
            filename: name.into(),
            size_bytes: size,
        }
    }

    fn response(id: &str) -> FileUploadResponse {
        FileUploadResponse {
            id: id.into(),
            original_filename: "report.xlsx".into(),
            file_size: 2 * 1024 * 1024,
            status: "uploaded".into(),
        }
    }

    #[test]
    fn test_single_file_completes_and_is_candidate() {
        let mut c = UploadCoordinator::new();
        let batch = c
            .start_upload(vec![local("report.xlsx", 2 * 1024 * 1024)])
            .unwrap();
        let key = batch.items[0].key;
        assert_eq!(c.files()[0].status, UploadStatus::Uploading);
        assert_eq!(c.files()[0].progress_percent, 0);

        assert!(
            c.apply(UploadEvent::Progress { key, percent: 40 })
                .is_none()
        );
        let settled = c
            .apply(UploadEvent::Succeeded {
                key,
                response: response("f-1"),
            })
            .unwrap();

        assert_eq!(settled.batch_id, batch.batch_id);
        let picked = settled.first_completed.unwrap();
        assert_eq!(picked.id.as_deref(), Some("f-1"));
        assert_eq!(picked.status, UploadStatus::Completed);
        assert!(Arc::ptr_eq(&picked, &c.files()[0]));
        assert!(!c.is_uploading());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut c = UploadCoordinator::new();
        let key = c.start_upload(vec![local("a.xlsx", 10)]).unwrap().items[0].key;
        let mut seen = vec![];
        for pct in [10, 30, 20, 150, 90] {
            c.apply(UploadEvent::Progress { key, percent: pct });
            seen.push(c.files()[0].progress_percent);
        }
        assert_eq!(seen, vec![10, 30, 30, 100, 100]);
    }

    #[test]
    fn test_failure_does_not_touch_siblings() {
        let mut c = UploadCoordinator::new();
        let batch = c
            .start_upload(vec![local("a.xlsx", 1), local("b.xlsx", 1)])
            .unwrap();
        let (a, b) = (batch.items[0].key, batch.items[1].key);

        assert!(
            c.apply(UploadEvent::Failed {
                key: a,
                message: "413 too large".into(),
            })
            .is_none()
        );
        assert_eq!(c.files()[1].status, UploadStatus::Uploading);

        let settled = c
            .apply(UploadEvent::Succeeded {
                key: b,
                response: response("f-b"),
            })
            .unwrap();
        assert_eq!(settled.results.len(), 2);
        assert_eq!(settled.results[0].status, UploadStatus::Error);
        assert_eq!(
            settled.results[0].error_message.as_deref(),
            Some("413 too large")
        );
        assert_eq!(
            settled.first_completed.unwrap().id.as_deref(),
            Some("f-b")
        );
    }

    #[test]
    fn test_second_batch_rejected_while_uploading() {
        let mut c = UploadCoordinator::new();
        c.start_upload(vec![local("a.xlsx", 1)]).unwrap();
        assert_eq!(
            c.start_upload(vec![local("b.xlsx", 1)]).unwrap_err(),
            UploadError::BatchInProgress
        );
        assert_eq!(
            UploadCoordinator::new().start_upload(vec![]).unwrap_err(),
            UploadError::Empty
        );
    }

    #[test]
    fn test_remove_and_clear_completed() {
        let mut c = UploadCoordinator::new();
        let batch = c
            .start_upload(vec![local("a.xlsx", 1), local("b.xlsx", 1)])
            .unwrap();
        assert!(matches!(
            c.remove_file(0),
            Err(UploadError::StillUploading(_))
        ));

        c.apply(UploadEvent::Succeeded {
            key: batch.items[0].key,
            response: response("f-a"),
        });
        c.apply(UploadEvent::Failed {
            key: batch.items[1].key,
            message: "boom".into(),
        });
        assert!(!c.only_failures());

        c.clear_completed();
        assert_eq!(c.files().len(), 1);
        assert!(c.only_failures());
        assert_eq!(c.remove_file(0).unwrap().original_filename, "b.xlsx");
        assert_eq!(c.remove_file(0).unwrap_err(), UploadError::NoSuchFile(0));
    }

    #[test]
    fn test_events_after_clear_are_ignored() {
        let mut c = UploadCoordinator::new();
        let key = c.start_upload(vec![local("a.xlsx", 1)]).unwrap().items[0].key;
        c.clear();
        assert!(
            c.apply(UploadEvent::Succeeded {
                key,
                response: response("f")
            })
            .is_none()
        );
        assert!(c.files().is_empty());
    }

    #[test]
    fn test_partition_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("q3.xlsx");
        std::fs::write(&ok, vec![0u8; 64]).unwrap();
        let big = dir.path().join("big.XLSX");
        std::fs::write(&big, vec![0u8; 512]).unwrap();
        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, b"hi").unwrap();
        let missing = dir.path().join("missing.xls");

        let out = partition_candidates(&[ok.clone(), big, txt, missing], 256);
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].path, ok);
        assert_eq!(out.accepted[0].size_bytes, 64);
        assert_eq!(out.rejected.len(), 3);
    }

    #[tokio::test]
    async fn test_run_batch_reports_each_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.xlsx");
        let b = dir.path().join("b.xlsx");
        std::fs::write(&a, vec![1u8; 32]).unwrap();
        std::fs::write(&b, vec![2u8; 32]).unwrap();

        let api: Arc<dyn BackendApi> =
            Arc::new(FakeBackend::new().fail_upload("b.xlsx", "unsupported format"));
        let mut c = UploadCoordinator::new();
        let batch = c
            .start_upload(vec![
                LocalFile::probe(&a).unwrap(),
                LocalFile::probe(&b).unwrap(),
            ])
            .unwrap();

        let (tx, mut rx) = mpsc::channel::<UploadEvent>(64);
        run_batch(api, batch, tx).await;

        let mut settled = None;
        while let Ok(ev) = rx.try_recv() {
            if let Some(s) = c.apply(ev) {
                settled = Some(s);
            }
        }
        let settled = settled.expect("batch should settle");
        assert_eq!(settled.results[0].id.as_deref(), Some("id-a.xlsx"));
        assert_eq!(settled.results[1].status, UploadStatus::Error);
        assert_eq!(
            settled.results[1].error_message.as_deref(),
            Some("unsupported format")
        );
    }
}
