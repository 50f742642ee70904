//! Workflow records and the backend payloads they are built from.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Financial statement classification of one worksheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementType {
    ProfitLoss,
    BalanceSheet,
    CashFlow,
    Other,
}

impl StatementType {
    /// Name used on the wire and in processing options.
    pub fn wire_name(self) -> &'static str {
        match self {
            StatementType::ProfitLoss => "PROFIT_LOSS",
            StatementType::BalanceSheet => "BALANCE_SHEET",
            StatementType::CashFlow => "CASH_FLOW",
            StatementType::Other => "OTHER",
        }
    }

    /// Human readable label.
    pub fn label(self) -> &'static str {
        match self {
            StatementType::ProfitLoss => "Profit & Loss",
            StatementType::BalanceSheet => "Balance Sheet",
            StatementType::CashFlow => "Cash Flow",
            StatementType::Other => "Other",
        }
    }

    /// Whether the type must be unique within one file.
    pub fn is_unique_per_file(self) -> bool {
        !matches!(self, StatementType::Other)
    }

    /// Next value in the picker order: unassigned, P&L, BS, CF, Other, unassigned.
    pub fn cycle(current: Option<StatementType>) -> Option<StatementType> {
        match current {
            None => Some(StatementType::ProfitLoss),
            Some(StatementType::ProfitLoss) => Some(StatementType::BalanceSheet),
            Some(StatementType::BalanceSheet) => Some(StatementType::CashFlow),
            Some(StatementType::CashFlow) => Some(StatementType::Other),
            Some(StatementType::Other) => None,
        }
    }
}

/// Upload state of a single file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStatus {
    Uploading,
    Completed,
    Error,
}

/// One file accepted for upload and its progress.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadedFile {
    /// Local identity used to route progress and completion.
    pub key: Uuid,
    /// Backend id, present once the upload completed.
    pub id: Option<String>,
    pub original_filename: String,
    pub file_size_bytes: u64,
    pub status: UploadStatus,
    /// 0..=100, never decreases while uploading.
    pub progress_percent: u8,
    pub error_message: Option<String>,
}

impl UploadedFile {
    /// Fresh record in the uploading state.
    pub fn new(original_filename: String, file_size_bytes: u64) -> Self {
        Self {
            key: Uuid::new_v4(),
            id: None,
            original_filename,
            file_size_bytes,
            status: UploadStatus::Uploading,
            progress_percent: 0,
            error_message: None,
        }
    }

    /// Completed or failed.
    pub fn is_settled(&self) -> bool {
        self.status != UploadStatus::Uploading
    }
}

/// Read-only description of one worksheet.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SheetInfo {
    pub name: String,
    #[serde(default, alias = "rowCount")]
    pub row_count: u64,
    #[serde(default, alias = "columnCount")]
    pub column_count: u64,
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Automatic classification supplied by the backend.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DetectedStatement {
    #[serde(alias = "sheetName")]
    pub sheet_name: String,
    #[serde(alias = "statementType")]
    pub statement_type: StatementType,
    #[serde(default)]
    pub confidence: f64,
}

/// User-correctable statement type of one sheet.
#[derive(Clone, Debug, PartialEq)]
pub struct StatementAssignment {
    pub sheet_name: String,
    pub assigned_type: Option<StatementType>,
    /// Copied from the matching detection, 0 when none.
    pub confidence: f64,
    /// Set once the user overrides the detected value.
    pub is_manual: bool,
}

/// Response of the preview endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FilePreview {
    #[serde(default)]
    pub sheets: Vec<SheetInfo>,
    #[serde(default, alias = "detectedStatements")]
    pub detected_statements: Vec<DetectedStatement>,
    #[serde(default)]
    pub metadata: Value,
}

/// Response of the upload endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct FileUploadResponse {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, alias = "originalFilename")]
    pub original_filename: String,
    #[serde(default, alias = "file_size_bytes", alias = "fileSizeBytes")]
    pub file_size: u64,
    #[serde(default)]
    pub status: String,
}

/// Response of the start-processing endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct ProcessingStarted {
    #[serde(alias = "taskId", deserialize_with = "id_string")]
    pub task_id: String,
}

/// Best-effort acknowledgement of a cancel request.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CancelAck {
    #[serde(default)]
    pub message: String,
}

/// Task state as reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteTaskState {
    #[serde(alias = "STARTED")]
    Pending,
    #[serde(alias = "PROGRESS")]
    Processing,
    #[serde(alias = "COMPLETED")]
    Success,
    #[serde(alias = "FAILED", alias = "ERROR", alias = "REVOKED")]
    Failure,
    #[serde(other)]
    Unknown,
}

/// How a status response ends (or doesn't end) a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Running,
    Succeeded,
    Failed,
}

/// Response of the task-status endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct TaskStatus {
    #[serde(alias = "state")]
    pub status: RemoteTaskState,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, alias = "currentStep")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl TaskStatus {
    /// Map the remote state onto the poller's view.
    pub fn outcome(&self) -> TaskOutcome {
        match self.status {
            RemoteTaskState::Success => TaskOutcome::Succeeded,
            RemoteTaskState::Failure => TaskOutcome::Failed,
            RemoteTaskState::Pending | RemoteTaskState::Processing | RemoteTaskState::Unknown => {
                TaskOutcome::Running
            }
        }
    }

    /// Progress clamped to 0..=100.
    pub fn progress_percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.clamp(0.0, 100.0).round() as u8
    }
}

/// Local lifecycle of a processing job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Processing,
    Completed,
    Error,
}

/// Backend processing task as tracked by the poller.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessingJob {
    /// Local identity; events carrying another key are stale.
    pub key: Uuid,
    pub file_id: Option<String>,
    /// Assigned by the backend once the start request succeeds.
    pub task_id: Option<String>,
    pub progress_percent: u8,
    pub state: JobState,
    pub current_step_label: String,
    pub error_message: Option<String>,
    pub result: Option<Value>,
}

impl ProcessingJob {
    /// Job record with nothing running.
    pub fn idle() -> Self {
        Self {
            key: Uuid::new_v4(),
            file_id: None,
            task_id: None,
            progress_percent: 0,
            state: JobState::Idle,
            current_step_label: String::new(),
            error_message: None,
            result: None,
        }
    }

    /// Fresh record for a new start request; progress always begins at 0.
    pub fn starting(file_id: String) -> Self {
        Self {
            file_id: Some(file_id),
            state: JobState::Processing,
            current_step_label: "Starting".into(),
            ..Self::idle()
        }
    }
}

impl Default for ProcessingJob {
    fn default() -> Self {
        Self::idle()
    }
}

/// Backend ids arrive as strings or integers depending on the endpoint.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
