//! Backend processing job: start, poll until terminal, cancel.

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    backend::api::BackendApi,
    models::{JobState, ProcessingJob, TaskOutcome},
};

/// Interval between status requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Rejected poller operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollerError {
    #[error("a processing job is already running")]
    AlreadyRunning,
    #[error("processing already completed")]
    AlreadyCompleted,
}

/// Progress of one job as seen by the polling loop.
#[derive(Clone, Debug)]
pub struct PollEvent {
    pub job_key: Uuid,
    pub kind: PollEventKind,
}

#[derive(Clone, Debug)]
pub enum PollEventKind {
    Started { task_id: String },
    StartFailed { message: String },
    Progress { percent: u8, label: Option<String> },
    Succeeded { result: Option<Value> },
    Failed { message: String },
}

/// Everything [`run_job`] needs for one job.
#[derive(Clone, Debug)]
pub struct StartRequest {
    pub job_key: Uuid,
    pub file_id: String,
    pub options: Map<String, Value>,
    pub interval: Duration,
    pub cancel: CancellationToken,
}

/// Local view of the single processing job of a workflow.
#[derive(Debug)]
pub struct ProcessingStatusPoller {
    job: ProcessingJob,
    interval: Duration,
    cancel: Option<CancellationToken>,
}

impl ProcessingStatusPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            job: ProcessingJob::idle(),
            interval,
            cancel: None,
        }
    }

    pub fn job(&self) -> &ProcessingJob {
        &self.job
    }

    pub fn is_running(&self) -> bool {
        self.job.state == JobState::Processing
    }

    /// Begin a new job. Allowed from idle, and from error as an explicit retry;
    /// a retry always gets a fresh record and therefore a new backend task.
    pub fn start(
        &mut self,
        file_id: String,
        options: Map<String, Value>,
    ) -> Result<StartRequest, PollerError> {
        match self.job.state {
            JobState::Processing => return Err(PollerError::AlreadyRunning),
            JobState::Completed => return Err(PollerError::AlreadyCompleted),
            JobState::Idle | JobState::Error => {}
        }
        let token = CancellationToken::new();
        self.job = ProcessingJob::starting(file_id.clone());
        self.cancel = Some(token.clone());
        tracing::info!("processing requested for file {file_id}");
        Ok(StartRequest {
            job_key: self.job.key,
            file_id,
            options,
            interval: self.interval,
            cancel: token,
        })
    }

    /// Apply a loop event. Returns the new state when the job just became terminal,
    /// which happens at most once per job.
    pub fn apply(&mut self, event: PollEvent) -> Option<JobState> {
        if event.job_key != self.job.key || self.job.state != JobState::Processing {
            tracing::debug!("dropping stale poll event for job {}", event.job_key);
            return None;
        }
        match event.kind {
            PollEventKind::Started { task_id } => {
                tracing::info!("processing task {task_id} started");
                self.job.task_id = Some(task_id);
                None
            }
            PollEventKind::Progress { percent, label } => {
                self.job.progress_percent = percent.min(100);
                if let Some(label) = label {
                    self.job.current_step_label = label;
                }
                None
            }
            PollEventKind::Succeeded { result } => {
                self.job.state = JobState::Completed;
                self.job.progress_percent = 100;
                self.job.current_step_label = "Completed".into();
                self.job.result = result;
                self.cancel = None;
                Some(JobState::Completed)
            }
            PollEventKind::StartFailed { message } | PollEventKind::Failed { message } => {
                tracing::error!("processing failed: {message}");
                self.job.state = JobState::Error;
                self.job.error_message = Some(message);
                self.cancel = None;
                Some(JobState::Error)
            }
        }
    }

    /// Stop the local loop and go back to idle. Returns the file id the backend
    /// should be told about when a job was in flight.
    pub fn cancel(&mut self) -> Option<String> {
        let in_flight = self.is_running();
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        let file_id = self.job.file_id.take();
        self.job = ProcessingJob::idle();
        if in_flight {
            tracing::info!("processing cancelled");
            file_id
        } else {
            None
        }
    }
}

/// Start the job on the backend and poll it until terminal or cancelled.
///
/// One status request is in flight at a time. A failed status request is
/// logged and retried on the next tick; only a terminal answer or the
/// cancellation token ends the loop.
pub async fn run_job<E>(api: Arc<dyn BackendApi>, request: StartRequest, tx: mpsc::Sender<E>)
where
    E: From<PollEvent> + Send + 'static,
{
    let StartRequest {
        job_key,
        file_id,
        options,
        interval,
        cancel,
    } = request;
    let emit = |kind: PollEventKind| E::from(PollEvent { job_key, kind });

    let started = tokio::select! {
        _ = cancel.cancelled() => return,
        r = api.start_processing(&file_id, &options) => r,
    };
    let task_id = match started {
        Ok(task_id) => task_id,
        Err(e) => {
            let _ = tx
                .send(emit(PollEventKind::StartFailed {
                    message: format!("{e:#}"),
                }))
                .await;
            return;
        }
    };
    if tx
        .send(emit(PollEventKind::Started {
            task_id: task_id.clone(),
        }))
        .await
        .is_err()
    {
        return;
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("polling of task {task_id} stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        let polled = tokio::select! {
            _ = cancel.cancelled() => return,
            r = api.get_task_status(&task_id) => r,
        };
        let status = match polled {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("status poll for task {task_id} failed, retrying: {e:#}");
                continue;
            }
        };

        let kind = match status.outcome() {
            TaskOutcome::Running => PollEventKind::Progress {
                percent: status.progress_percent(),
                label: status.current_step.clone(),
            },
            TaskOutcome::Succeeded => PollEventKind::Succeeded {
                result: status.result.clone(),
            },
            TaskOutcome::Failed => PollEventKind::Failed {
                message: status
                    .error
                    .clone()
                    .unwrap_or_else(|| "processing failed".into()),
            },
        };
        let terminal = status.outcome() != TaskOutcome::Running;
        if tx.send(emit(kind)).await.is_err() || terminal {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::testing::FakeBackend,
        models::RemoteTaskState,
    };

    /// Run a job to completion and collect what it reported.
    async fn drive(api: Arc<FakeBackend>, request: StartRequest) -> Vec<PollEvent> {
        let (tx, mut rx) = mpsc::channel::<PollEvent>(64);
        run_job(api, request, tx).await;
        let mut out = vec![];
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_success() {
        let api = Arc::new(
            FakeBackend::new()
                .with_start(Ok("task-1"))
                .with_status(RemoteTaskState::Processing, 10.0)
                .with_status(RemoteTaskState::Processing, 45.0)
                .with_status(RemoteTaskState::Processing, 80.0)
                .with_status(RemoteTaskState::Success, 100.0),
        );
        let mut poller = ProcessingStatusPoller::new(DEFAULT_POLL_INTERVAL);
        let request = poller.start("f-1".into(), Map::new()).unwrap();

        let before = Instant::now();
        let events = drive(api.clone(), request).await;
        assert!(Instant::now() - before >= DEFAULT_POLL_INTERVAL * 4);

        let mut progress = vec![];
        let mut terminal = vec![];
        for ev in events {
            if let PollEventKind::Progress { percent, .. } = &ev.kind {
                progress.push(*percent);
            }
            if let Some(state) = poller.apply(ev) {
                terminal.push(state);
            }
        }
        assert_eq!(progress, vec![10, 45, 80]);
        assert_eq!(terminal, vec![JobState::Completed]);
        assert_eq!(poller.job().task_id.as_deref(), Some("task-1"));
        assert_eq!(poller.job().progress_percent, 100);
        assert_eq!(api.count("status:"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_error_keeps_polling() {
        let api = Arc::new(
            FakeBackend::new()
                .with_start(Ok("task-2"))
                .with_status(RemoteTaskState::Processing, 20.0)
                .with_poll_error("connection reset by peer")
                .with_status(RemoteTaskState::Processing, 60.0)
                .with_status(RemoteTaskState::Success, 100.0),
        );
        let mut poller = ProcessingStatusPoller::new(DEFAULT_POLL_INTERVAL);
        let request = poller.start("f-1".into(), Map::new()).unwrap();
        let events = drive(api.clone(), request).await;

        let mut states = vec![];
        for ev in events {
            poller.apply(ev);
            states.push(poller.job().state);
        }
        assert!(states[..states.len() - 1]
            .iter()
            .all(|s| *s == JobState::Processing));
        assert_eq!(poller.job().state, JobState::Completed);
        assert_eq!(api.count("status:"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_goes_to_error_without_polling() {
        let api = Arc::new(FakeBackend::new().with_start(Err("file not found")));
        let mut poller = ProcessingStatusPoller::new(DEFAULT_POLL_INTERVAL);
        let request = poller.start("f-9".into(), Map::new()).unwrap();
        let events = drive(api.clone(), request).await;

        assert_eq!(events.len(), 1);
        assert_eq!(poller.apply(events[0].clone()), Some(JobState::Error));
        assert_eq!(
            poller.job().error_message.as_deref(),
            Some("file not found")
        );
        assert_eq!(api.count("status:"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_is_terminal() {
        let api = Arc::new(
            FakeBackend::new()
                .with_start(Ok("task-3"))
                .with_status(RemoteTaskState::Failure, 30.0)
                .with_status(RemoteTaskState::Processing, 50.0),
        );
        let mut poller = ProcessingStatusPoller::new(DEFAULT_POLL_INTERVAL);
        let request = poller.start("f-1".into(), Map::new()).unwrap();
        let events = drive(api.clone(), request).await;

        let terminal: Vec<_> = events.into_iter().filter_map(|e| poller.apply(e)).collect();
        assert_eq!(terminal, vec![JobState::Error]);
        assert_eq!(poller.job().error_message.as_deref(), Some("parser crashed"));
        assert_eq!(api.count("status:"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop_and_resets() {
        let api = Arc::new(FakeBackend::new().with_start(Ok("task-4")));
        let mut poller = ProcessingStatusPoller::new(DEFAULT_POLL_INTERVAL);
        let request = poller.start("f-1".into(), Map::new()).unwrap();
        let job_key = request.job_key;

        let (tx, mut rx) = mpsc::channel::<PollEvent>(64);
        let handle = tokio::spawn(run_job(api.clone() as Arc<dyn BackendApi>, request, tx));
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3 + Duration::from_millis(10)).await;

        assert_eq!(poller.cancel().as_deref(), Some("f-1"));
        handle.await.unwrap();
        assert_eq!(poller.job().state, JobState::Idle);

        let polls = api.count("status:");
        assert_eq!(polls, 3);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        assert_eq!(api.count("status:"), polls);

        // Events still queued from the old loop no longer apply.
        while let Ok(ev) = rx.try_recv() {
            assert_eq!(ev.job_key, job_key);
            assert_eq!(poller.apply(ev), None);
        }
    }

    #[test]
    fn test_retry_gets_fresh_job() {
        let mut poller = ProcessingStatusPoller::new(DEFAULT_POLL_INTERVAL);
        let first = poller.start("f-1".into(), Map::new()).unwrap();
        assert_eq!(
            poller.start("f-1".into(), Map::new()).unwrap_err(),
            PollerError::AlreadyRunning
        );
        poller.apply(PollEvent {
            job_key: first.job_key,
            kind: PollEventKind::Progress {
                percent: 70,
                label: Some("Parsing".into()),
            },
        });
        poller.apply(PollEvent {
            job_key: first.job_key,
            kind: PollEventKind::Failed {
                message: "timeout".into(),
            },
        });

        let second = poller.start("f-1".into(), Map::new()).unwrap();
        assert_ne!(first.job_key, second.job_key);
        assert_eq!(poller.job().progress_percent, 0);
        assert!(poller.job().error_message.is_none());
        assert!(poller.job().task_id.is_none());

        // Nothing from the failed job leaks into the retry.
        assert_eq!(
            poller.apply(PollEvent {
                job_key: first.job_key,
                kind: PollEventKind::Succeeded { result: None },
            }),
            None
        );
        assert_eq!(poller.job().state, JobState::Processing);
    }

    #[test]
    fn test_cancel_when_idle_is_local_only() {
        let mut poller = ProcessingStatusPoller::new(DEFAULT_POLL_INTERVAL);
        assert_eq!(poller.cancel(), None);
        assert_eq!(poller.job().state, JobState::Idle);
    }
}
