//! Background worker running backend requests for the workflow.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::{
    backend::{api::BackendApi, client::HttpBackend},
    config::Config,
    models::FilePreview,
    workflow::{
        Effect,
        poller::{self, PollEvent, StartRequest},
        upload::{self, UploadBatch, UploadEvent},
    },
};

/// Commands sent from the UI to the worker.
#[derive(Debug)]
pub enum WorkerCmd {
    /// Upload a batch concurrently.
    Upload(UploadBatch),
    FetchPreview { file_id: String },
    /// Start processing and poll until terminal or cancelled.
    Process(StartRequest),
    /// Best-effort backend cancel; the local loop is stopped by its token.
    Cancel { file_id: String },
    Login { username: String, password: String },
    /// Apply updated settings and reconnect.
    SaveSettings(Config),
}

/// Events emitted by the worker for UI updates.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    Upload(UploadEvent),
    Poll(PollEvent),
    PreviewLoaded { file_id: String, preview: FilePreview },
    PreviewFailed { file_id: String, message: String },
    /// Login succeeded for the given user.
    LoggedIn(String),
    /// Informational log message.
    Log(String),
    /// User-visible error message.
    Error(String),
}

impl From<UploadEvent> for WorkerEvent {
    fn from(ev: UploadEvent) -> Self {
        Self::Upload(ev)
    }
}

impl From<PollEvent> for WorkerEvent {
    fn from(ev: PollEvent) -> Self {
        Self::Poll(ev)
    }
}

impl From<Effect> for WorkerCmd {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Upload(batch) => Self::Upload(batch),
            Effect::FetchPreview { file_id } => Self::FetchPreview { file_id },
            Effect::StartProcessing(req) => Self::Process(req),
            Effect::CancelProcessing { file_id } => Self::Cancel { file_id },
        }
    }
}

/// Builds the backend client for a config snapshot.
pub type Connect = Box<dyn Fn(&Config) -> Result<Arc<dyn BackendApi>> + Send>;

/// The HTTP backend described by `[backend]` and `[auth]`.
pub fn connect_http(cfg: &Config) -> Result<Arc<dyn BackendApi>> {
    Ok(Arc::new(HttpBackend::from_config(cfg)?))
}

/// Main worker loop. Long-running work is spawned so cancel and new
/// commands are served while uploads and polling are in progress.
pub async fn run(
    mut rx: mpsc::Receiver<WorkerCmd>,
    tx: mpsc::Sender<WorkerEvent>,
    cfg: Config,
    connect: Connect,
) {
    let mut api = match connect(&cfg) {
        Ok(api) => api,
        Err(e) => {
            tracing::error!("backend client init failed: {e:#}");
            let _ = tx
                .send(WorkerEvent::Error(format!("backend client init failed: {e:#}")))
                .await;
            return;
        }
    };
    tracing::info!("worker started for {}", cfg.backend.api_root());

    while let Some(cmd) = rx.recv().await {
        match cmd {
            WorkerCmd::Upload(batch) => {
                tracing::info!("upload batch {} ({} files)", batch.batch_id, batch.items.len());
                tokio::spawn(upload::run_batch(api.clone(), batch, tx.clone()));
            }

            WorkerCmd::FetchPreview { file_id } => {
                let api = api.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let ev = match api.get_preview(&file_id).await {
                        Ok(preview) => WorkerEvent::PreviewLoaded { file_id, preview },
                        Err(e) => WorkerEvent::PreviewFailed {
                            file_id,
                            message: format!("{e:#}"),
                        },
                    };
                    let _ = tx.send(ev).await;
                });
            }

            WorkerCmd::Process(request) => {
                tokio::spawn(poller::run_job(api.clone(), request, tx.clone()));
            }

            WorkerCmd::Cancel { file_id } => {
                let api = api.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    // The user already sees the job as cancelled.
                    let ev = match api.cancel_processing(&file_id).await {
                        Ok(msg) if msg.is_empty() => {
                            WorkerEvent::Log(format!("cancelled {file_id}"))
                        }
                        Ok(msg) => WorkerEvent::Log(msg),
                        Err(e) => {
                            tracing::warn!("cancel of {file_id} not acknowledged: {e:#}");
                            WorkerEvent::Log(format!("backend cancel failed: {e:#}"))
                        }
                    };
                    let _ = tx.send(ev).await;
                });
            }

            WorkerCmd::Login { username, password } => {
                let ev = match api.login(&username, &password).await {
                    Ok(()) => WorkerEvent::LoggedIn(username),
                    Err(e) => {
                        tracing::error!("login failed: {e:#}");
                        WorkerEvent::Error(format!("login failed: {e:#}"))
                    }
                };
                let _ = tx.send(ev).await;
            }

            WorkerCmd::SaveSettings(new_cfg) => match connect(&new_cfg) {
                Ok(new_api) => {
                    // In-flight tasks keep the client they were started with.
                    api = new_api;
                    tracing::info!("settings updated: {}", new_cfg.backend.api_root());
                    let _ = tx.send(WorkerEvent::Log("settings updated".into())).await;
                }
                Err(e) => {
                    tracing::error!("settings rejected: {e:#}");
                    let _ = tx
                        .send(WorkerEvent::Error(format!("settings rejected: {e:#}")))
                        .await;
                }
            },
        }
    }
    tracing::info!("worker stopped");
}
