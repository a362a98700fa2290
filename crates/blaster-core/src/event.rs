//! Realtime status notifications for the dashboard.
//!
//! Delivery through a sink is best effort. Nothing in the engine depends on
//! an event arriving; the job store is the source of truth.

use serde::{Deserialize, Serialize};

use crate::types::{BroadcastJob, DeliveryResult, JobId, JobStatus};

/// Event name emitted whenever a job reaches a terminal status.
pub const JOB_STATUS_EVENT: &str = "broadcast.status";

/// Fire-and-forget outlet for dashboard events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: serde_json::Value);
}

/// Sink that drops everything. Used when no realtime channel is wired up.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &str, _payload: serde_json::Value) {}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub delivery_result: Option<DeliveryResult>,
    pub failure_reason: Option<String>,
}

impl From<&BroadcastJob> for JobStatusEvent {
    fn from(job: &BroadcastJob) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            delivery_result: job.delivery_result.clone(),
            failure_reason: job.failure_reason.clone(),
        }
    }
}
