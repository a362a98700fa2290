use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque broadcast job identifier (UUID v4 string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Plain broadcasts and meeting reminders share one delivery path; they only
/// differ in how the caller derives `scheduled_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    Message,
    Meeting,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobType::Message => "message",
            JobType::Meeting => "meeting",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(JobType::Message),
            "meeting" => Ok(JobType::Meeting),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// Lifecycle state of a broadcast job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its timer. The only state that can be edited or executed.
    Scheduled,
    /// Delivered to at least one recipient.
    Sent,
    /// Nobody received it, or the job was aborted before sending.
    Failed,
    /// Cancelled by an operator before firing.
    Cancelled,
    /// Meeting reminder whose meeting has ended.
    ///
    /// Never written by the delivery engine: whatever tracks meetings moves
    /// a `sent` meeting job here once its `ends_at` passes. The engine only
    /// reads it back as terminal.
    Completed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Scheduled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Sent => "sent",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "sent" => Ok(JobStatus::Sent),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "completed" => Ok(JobStatus::Completed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Reference to an uploaded file. Loaded only right before sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Path relative to the storage root.
    pub storage_path: String,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// A persisted broadcast job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastJob {
    pub id: JobId,
    pub job_type: JobType,
    /// Storage-form phone numbers, duplicates already removed.
    pub recipients: Vec<String>,
    pub message_body: Option<String>,
    pub attachments: Vec<Attachment>,
    pub scheduled_at: DateTime<Utc>,
    /// Meeting end, when the job is a meeting reminder.
    pub ends_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    /// Set once an execution attempt has completed.
    pub delivery_result: Option<DeliveryResult>,
    /// Why the job failed without a per-recipient breakdown (missed window, missing file, ...).
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BroadcastJob {
    pub fn has_body(&self) -> bool {
        self.message_body
            .as_deref()
            .is_some_and(|b| !b.trim().is_empty())
    }
}

/// Why a single recipient did not receive the broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Number failed syntactic validation; the provider was never asked.
    Format,
    /// Provider says the number has no account.
    NotReachable,
    /// The provider call itself errored.
    Transport,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Format => "format",
            FailureKind::NotReachable => "not_reachable",
            FailureKind::Transport => "transport",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecipient {
    pub recipient: String,
    pub reason: FailureKind,
    /// Provider error text for transport failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-job aggregate produced once per execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub total: usize,
    pub sent_to: Vec<String>,
    pub failed_to: Vec<FailedRecipient>,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryResult {
    pub fn any_sent(&self) -> bool {
        !self.sent_to.is_empty()
    }
}

/// What the executor hands to the result reporter.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// The send loop ran; status follows from `sent_to`.
    Delivered(DeliveryResult),
    /// The job never reached the send loop.
    Aborted { reason: String },
}

impl DeliveryOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            DeliveryOutcome::Delivered(result) if result.any_sent() => JobStatus::Sent,
            _ => JobStatus::Failed,
        }
    }
}
