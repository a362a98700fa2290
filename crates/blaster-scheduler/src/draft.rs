//! Create/edit payloads for broadcast jobs.
//!
//! Everything the engine assumes about a stored job is checked here, before
//! the row is written: non-empty content, well-formed unique recipients and a
//! schedule that is not already stale.

use std::collections::HashSet;

use blaster_core::{
    Attachment, BlasterError, BroadcastJob, JobId, JobStatus, JobType, PhoneRules,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::{classify, FireWindow};

/// Operator-supplied job definition (HTTP body for create and edit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDraft {
    #[serde(default)]
    pub job_type: JobType,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub message_body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

/// A draft that passed [`JobDraft::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidDraft {
    job_type: JobType,
    recipients: Vec<String>,
    message_body: Option<String>,
    attachments: Vec<Attachment>,
    scheduled_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
}

impl JobDraft {
    pub fn validate(
        self,
        rules: &PhoneRules,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> blaster_core::Result<ValidDraft> {
        let message_body = self
            .message_body
            .filter(|b| !b.trim().is_empty());
        if message_body.is_none() && self.attachments.is_empty() {
            return Err(BlasterError::InvalidJob(
                "a message body or at least one attachment is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        let mut recipients = Vec::with_capacity(self.recipients.len());
        for raw in &self.recipients {
            let number = rules
                .to_storage_form(raw)
                .map_err(|e| BlasterError::InvalidRecipient {
                    raw: raw.clone(),
                    reason: e.to_string(),
                })?;
            if seen.insert(number.clone()) {
                recipients.push(number);
            }
        }
        if recipients.is_empty() {
            return Err(BlasterError::InvalidJob("no recipients".into()));
        }

        let scheduled_at = match classify(self.scheduled_at, now, grace) {
            FireWindow::Future(_) => self.scheduled_at,
            FireWindow::Due => now,
            FireWindow::Missed { late_by } => {
                return Err(BlasterError::ScheduleRejected(format!(
                    "scheduled_at is {}s in the past",
                    late_by.num_seconds()
                )));
            }
        };

        if let Some(ends_at) = self.ends_at {
            if ends_at <= scheduled_at {
                return Err(BlasterError::InvalidJob(
                    "ends_at must be after scheduled_at".into(),
                ));
            }
        }

        Ok(ValidDraft {
            job_type: self.job_type,
            recipients,
            message_body,
            attachments: self.attachments,
            scheduled_at,
            ends_at: self.ends_at,
        })
    }
}

impl ValidDraft {
    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Build a fresh `scheduled` job.
    pub fn into_job(self, now: DateTime<Utc>) -> BroadcastJob {
        BroadcastJob {
            id: JobId::new(),
            job_type: self.job_type,
            recipients: self.recipients,
            message_body: self.message_body,
            attachments: self.attachments,
            scheduled_at: self.scheduled_at,
            ends_at: self.ends_at,
            status: JobStatus::Scheduled,
            delivery_result: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the editable fields of `job`, keeping identity and history.
    pub fn apply_to(self, job: &mut BroadcastJob, now: DateTime<Utc>) {
        job.job_type = self.job_type;
        job.recipients = self.recipients;
        job.message_body = self.message_body;
        job.attachments = self.attachments;
        job.scheduled_at = self.scheduled_at;
        job.ends_at = self.ends_at;
        job.updated_at = now;
    }
}
