//! Upload -> preview -> configure -> processing -> complete.
//!
//! [`ExcelProcessingWorkflow`] owns all state of one run. It never performs
//! I/O itself: operations that need the backend return an [`Effect`] which the
//! caller hands to the worker, and the worker's results come back through the
//! `apply_*` methods.

pub mod assignment;
pub mod machine;
pub mod poller;
pub mod step;
pub mod upload;

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{FilePreview, JobState, ProcessingJob, StatementType, UploadStatus, UploadedFile};

use assignment::{AssignmentError, StatementAssignmentValidator, ValidationReport};
use machine::{ExitGuards, WorkflowStateMachine};
use poller::{PollEvent, PollerError, ProcessingStatusPoller, StartRequest};
use step::{StepStatus, WorkflowStep};
use upload::{LocalFile, UploadBatch, UploadCoordinator, UploadError, UploadEvent, UploadSettled};

/// Options key carrying the confirmed sheet mapping.
pub const ASSIGNMENTS_OPTION: &str = "statement_assignments";

/// Backend work requested by a workflow operation.
#[derive(Clone, Debug)]
pub enum Effect {
    Upload(UploadBatch),
    FetchPreview { file_id: String },
    StartProcessing(StartRequest),
    /// Best-effort; the local state is already reset.
    CancelProcessing { file_id: String },
}

/// Why a workflow operation was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error(transparent)]
    Poller(#[from] PollerError),
    #[error("{}", blocked_reason(*.0))]
    Blocked(WorkflowStep),
    #[error("not available in the {} step", .0.title())]
    WrongStep(WorkflowStep),
    #[error("row {0} is not a completed upload")]
    NotSelectable(usize),
    #[error("navigation is locked while processing runs")]
    NavigationLocked,
}

/// Preview fetch lifecycle for the selected file.
#[derive(Clone, Debug, PartialEq)]
pub enum PreviewState {
    Idle,
    Loading { file_id: String },
    Loaded { file_id: String, preview: FilePreview },
    Failed { file_id: String, message: String },
}

/// State of one upload-to-complete run.
#[derive(Debug)]
pub struct ExcelProcessingWorkflow {
    machine: WorkflowStateMachine,
    uploads: UploadCoordinator,
    selected_file: Option<Arc<UploadedFile>>,
    preview: PreviewState,
    assignments: StatementAssignmentValidator,
    poller: ProcessingStatusPoller,
    /// Options forwarded with every start request.
    base_options: Map<String, Value>,
    /// Options of the last start request, reused by retry.
    last_options: Option<Map<String, Value>>,
}

impl ExcelProcessingWorkflow {
    pub fn new(poll_interval: Duration, base_options: Map<String, Value>) -> Self {
        Self {
            machine: WorkflowStateMachine::new(),
            uploads: UploadCoordinator::new(),
            selected_file: None,
            preview: PreviewState::Idle,
            assignments: StatementAssignmentValidator::default(),
            poller: ProcessingStatusPoller::new(poll_interval),
            base_options,
            last_options: None,
        }
    }

    pub fn current_step(&self) -> WorkflowStep {
        self.machine.current()
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    pub fn selected_file(&self) -> Option<&Arc<UploadedFile>> {
        self.selected_file.as_ref()
    }

    pub fn preview(&self) -> &PreviewState {
        &self.preview
    }

    pub fn assignments(&self) -> &StatementAssignmentValidator {
        &self.assignments
    }

    pub fn validation(&self) -> ValidationReport {
        self.assignments.validate()
    }

    pub fn job(&self) -> &ProcessingJob {
        self.poller.job()
    }

    /// Step indicator contents.
    pub fn step_statuses(&self) -> Vec<(WorkflowStep, StepStatus)> {
        self.machine.statuses(self.failed_step())
    }

    /// The current step when it is showing an error.
    pub fn failed_step(&self) -> Option<WorkflowStep> {
        let current = self.current_step();
        let failed = match current {
            WorkflowStep::Upload => self.uploads.only_failures(),
            WorkflowStep::Preview => matches!(self.preview, PreviewState::Failed { .. }),
            WorkflowStep::Configure => self.validation().has_duplicates,
            WorkflowStep::Processing => self.job().state == JobState::Error,
            WorkflowStep::Complete => false,
        };
        failed.then_some(current)
    }

    fn exit_guards(&self) -> ExitGuards {
        ExitGuards {
            has_selected_file: self.selected_file.is_some(),
            preview_loaded: self.preview_is_loaded(),
            assignments_confirmable: self.validation().is_confirmable(),
            job_completed: self.job().state == JobState::Completed,
        }
    }

    /// True only for a loaded preview of the current selection.
    fn preview_is_loaded(&self) -> bool {
        let Some(selected) = self.selected_file.as_ref().and_then(|f| f.id.as_deref()) else {
            return false;
        };
        matches!(&self.preview, PreviewState::Loaded { file_id, .. } if file_id == selected)
    }

    // ---- upload ----

    /// Queue a batch of accepted files.
    pub fn start_upload(&mut self, files: Vec<LocalFile>) -> Result<Effect, WorkflowError> {
        self.require_step(WorkflowStep::Upload)?;
        Ok(Effect::Upload(self.uploads.start_upload(files)?))
    }

    /// Feed a transport event; when the batch settles and nothing is selected
    /// yet, its first completed file becomes the selection.
    pub fn apply_upload(&mut self, event: UploadEvent) -> Option<UploadSettled> {
        let settled = self.uploads.apply(event)?;
        if self.selected_file.is_none()
            && let Some(first) = &settled.first_completed
        {
            tracing::info!("selected {}", first.original_filename);
            self.selected_file = Some(first.clone());
        }
        Some(settled)
    }

    /// Pick another completed upload as the file to process.
    pub fn select_file(&mut self, index: usize) -> Result<(), WorkflowError> {
        self.require_step(WorkflowStep::Upload)?;
        let file = self
            .uploads
            .get(index)
            .filter(|f| f.status == UploadStatus::Completed)
            .cloned()
            .ok_or(WorkflowError::NotSelectable(index))?;
        if self.selected_file.as_ref().map(|f| f.key) != Some(file.key) {
            // Preview and mapping belong to the previous selection.
            self.preview = PreviewState::Idle;
            self.assignments.clear();
            tracing::info!("selected {}", file.original_filename);
        }
        self.selected_file = Some(file);
        Ok(())
    }

    pub fn remove_file(&mut self, index: usize) -> Result<(), WorkflowError> {
        self.require_step(WorkflowStep::Upload)?;
        self.uploads.remove_file(index)?;
        self.drop_missing_selection();
        Ok(())
    }

    pub fn clear_completed(&mut self) -> Result<(), WorkflowError> {
        self.require_step(WorkflowStep::Upload)?;
        self.uploads.clear_completed();
        self.drop_missing_selection();
        Ok(())
    }

    /// Forget the selection once its record has left the list.
    fn drop_missing_selection(&mut self) {
        let Some(key) = self.selected_file.as_ref().map(|f| f.key) else {
            return;
        };
        if self.uploads.files().iter().any(|f| f.key == key) {
            return;
        }
        tracing::info!("selected file removed from the list");
        self.selected_file = None;
        self.preview = PreviewState::Idle;
        self.assignments.clear();
    }

    // ---- navigation ----

    /// Move to the next step if the current step's exit guard holds.
    ///
    /// Leaving `configure` confirms the assignments and starts processing.
    pub fn advance(&mut self) -> Result<Option<Effect>, WorkflowError> {
        let current = self.current_step();
        if current == WorkflowStep::Configure {
            return self.confirm_assignments().map(Some);
        }
        let Some(target) = current.next() else {
            return Err(WorkflowError::Blocked(current));
        };
        let guards = self.exit_guards();
        if !self.machine.advance(target, &guards) {
            return Err(WorkflowError::Blocked(current));
        }
        Ok(match target {
            WorkflowStep::Preview => self.ensure_preview(),
            _ => None,
        })
    }

    /// Go back to an earlier step without discarding later state.
    pub fn go_to(&mut self, target: WorkflowStep) -> Result<Option<Effect>, WorkflowError> {
        if self.poller.is_running() {
            return Err(WorkflowError::NavigationLocked);
        }
        if !self.machine.go_to(target) {
            return Err(WorkflowError::Blocked(self.current_step()));
        }
        Ok(match target {
            WorkflowStep::Preview => self.ensure_preview(),
            _ => None,
        })
    }

    /// Back to `upload` with nothing left over. A running job is cancelled.
    pub fn reset(&mut self) -> Option<Effect> {
        let cancel = self
            .poller
            .cancel()
            .map(|file_id| Effect::CancelProcessing { file_id });
        self.machine.reset();
        self.uploads.clear();
        self.selected_file = None;
        self.preview = PreviewState::Idle;
        self.assignments.clear();
        self.last_options = None;
        tracing::info!("workflow reset");
        cancel
    }

    // ---- preview ----

    /// Request the preview of the selected file unless it is loaded or loading.
    fn ensure_preview(&mut self) -> Option<Effect> {
        let file_id = self.selected_file.as_ref()?.id.clone()?;
        match &self.preview {
            PreviewState::Loaded { file_id: id, .. } | PreviewState::Loading { file_id: id }
                if *id == file_id =>
            {
                None
            }
            _ => {
                self.preview = PreviewState::Loading {
                    file_id: file_id.clone(),
                };
                Some(Effect::FetchPreview { file_id })
            }
        }
    }

    /// Re-issue the failed preview request.
    pub fn retry_preview(&mut self) -> Result<Option<Effect>, WorkflowError> {
        self.require_step(WorkflowStep::Preview)?;
        Ok(match &self.preview {
            PreviewState::Failed { .. } | PreviewState::Idle => {
                self.preview = PreviewState::Idle;
                self.ensure_preview()
            }
            _ => None,
        })
    }

    /// Store a preview and seed assignments from it. Answers for a file that
    /// is no longer selected are dropped.
    pub fn apply_preview_loaded(&mut self, file_id: &str, preview: FilePreview) -> bool {
        if !self.is_pending_preview(file_id) {
            return false;
        }
        tracing::info!(
            "preview of {file_id}: {} sheets, {} detections",
            preview.sheets.len(),
            preview.detected_statements.len()
        );
        self.assignments
            .load(preview.sheets.clone(), preview.detected_statements.clone());
        self.preview = PreviewState::Loaded {
            file_id: file_id.to_string(),
            preview,
        };
        true
    }

    pub fn apply_preview_failed(&mut self, file_id: &str, message: String) -> bool {
        if !self.is_pending_preview(file_id) {
            return false;
        }
        tracing::warn!("preview of {file_id} failed: {message}");
        self.preview = PreviewState::Failed {
            file_id: file_id.to_string(),
            message,
        };
        true
    }

    fn is_pending_preview(&self, file_id: &str) -> bool {
        matches!(&self.preview, PreviewState::Loading { file_id: id } if id == file_id)
    }

    // ---- configure ----

    pub fn update_assignment(
        &mut self,
        sheet_name: &str,
        new_type: Option<StatementType>,
    ) -> Result<(), WorkflowError> {
        self.require_step(WorkflowStep::Configure)?;
        self.assignments.update_assignment(sheet_name, new_type)?;
        Ok(())
    }

    pub fn reset_assignments(&mut self) -> Result<(), WorkflowError> {
        self.require_step(WorkflowStep::Configure)?;
        self.assignments.reset_to_detected();
        Ok(())
    }

    /// Confirm the mapping, enter `processing` and start the job.
    pub fn confirm_assignments(&mut self) -> Result<Effect, WorkflowError> {
        self.require_step(WorkflowStep::Configure)?;
        let confirmed = self.assignments.confirm()?;
        if !self.exit_guards().allows_exit(WorkflowStep::Configure) {
            return Err(WorkflowError::Blocked(WorkflowStep::Configure));
        }
        let Some(file_id) = self.selected_file.as_ref().and_then(|f| f.id.clone()) else {
            return Err(WorkflowError::Blocked(WorkflowStep::Upload));
        };

        let mut mapping = Map::new();
        for a in &confirmed {
            if let Some(t) = a.assigned_type.filter(|t| t.is_unique_per_file()) {
                mapping.insert(a.sheet_name.clone(), Value::String(t.wire_name().into()));
            }
        }
        let mut options = self.base_options.clone();
        options.insert(ASSIGNMENTS_OPTION.into(), Value::Object(mapping));

        let request = self.poller.start(file_id, options.clone())?;
        self.last_options = Some(options);
        let guards = self.exit_guards();
        self.machine.advance(WorkflowStep::Processing, &guards);
        Ok(Effect::StartProcessing(request))
    }

    // ---- processing ----

    /// Feed a polling event. Success moves the workflow to `complete` once.
    pub fn apply_poll(&mut self, event: PollEvent) -> Option<JobState> {
        let terminal = self.poller.apply(event)?;
        if terminal == JobState::Completed {
            let guards = self.exit_guards();
            self.machine.advance(WorkflowStep::Complete, &guards);
        }
        Some(terminal)
    }

    /// Start a new job for the same file after a failure or cancellation.
    pub fn retry_processing(&mut self) -> Result<Effect, WorkflowError> {
        self.require_step(WorkflowStep::Processing)?;
        let file_id = self
            .selected_file
            .as_ref()
            .and_then(|f| f.id.clone())
            .ok_or(WorkflowError::Blocked(WorkflowStep::Upload))?;
        let options = self
            .last_options
            .clone()
            .unwrap_or_else(|| self.base_options.clone());
        Ok(Effect::StartProcessing(self.poller.start(file_id, options)?))
    }

    pub fn cancel_processing(&mut self) -> Option<Effect> {
        self.poller
            .cancel()
            .map(|file_id| Effect::CancelProcessing { file_id })
    }

    fn require_step(&self, step: WorkflowStep) -> Result<(), WorkflowError> {
        if self.current_step() == step {
            Ok(())
        } else {
            Err(WorkflowError::WrongStep(self.current_step()))
        }
    }
}

fn blocked_reason(step: WorkflowStep) -> &'static str {
    match step {
        WorkflowStep::Upload => "upload and select a file first",
        WorkflowStep::Preview => "the preview has not loaded",
        WorkflowStep::Configure => "assign at least one statement type without duplicates",
        WorkflowStep::Processing => "processing has not completed",
        WorkflowStep::Complete => "the workflow is complete",
    }
}
