use std::sync::Arc;

use blaster_core::{
    DeliveryOutcome, EventSink, JobId, JobStatus, JobStatusEvent, JOB_STATUS_EVENT,
};
use tracing::{info, warn};

use crate::{error::Result, store::JobStore};

/// Reason recorded when a job was found too late to run.
pub const MISSED_WINDOW_REASON: &str = "missed schedule window";

/// Sole writer of a job's terminal status and delivery result.
///
/// Persists first, then emits [`JOB_STATUS_EVENT`]; a dashboard that sees the
/// event can always re-read the same data from the store.
pub struct ResultReporter {
    store: Arc<dyn JobStore>,
    sink: Arc<dyn EventSink>,
}

impl ResultReporter {
    pub fn new(store: Arc<dyn JobStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }

    /// Record the outcome of an execution attempt.
    ///
    /// Returns the status written, or `None` when the job had already left
    /// `scheduled` (nothing is written or emitted in that case).
    pub fn report(&self, job_id: &JobId, outcome: &DeliveryOutcome) -> Result<Option<JobStatus>> {
        let status = outcome.status();
        let written = match outcome {
            DeliveryOutcome::Delivered(result) => {
                self.store.update_status(job_id, status, Some(result), None)?
            }
            DeliveryOutcome::Aborted { reason } => {
                self.store
                    .update_status(job_id, status, None, Some(reason.as_str()))?
            }
        };

        if !written {
            warn!(job_id = %job_id, "outcome dropped: job no longer scheduled");
            return Ok(None);
        }

        match outcome {
            DeliveryOutcome::Delivered(r) => info!(
                job_id = %job_id,
                %status,
                sent = r.sent_to.len(),
                failed = r.failed_to.len(),
                "delivery result recorded"
            ),
            DeliveryOutcome::Aborted { reason } => {
                info!(job_id = %job_id, %status, %reason, "job aborted")
            }
        }

        self.emit(job_id);
        Ok(Some(status))
    }

    /// Fail a job whose fire time passed long ago, without executing it.
    pub fn report_missed(&self, job_id: &JobId) -> Result<Option<JobStatus>> {
        self.report(
            job_id,
            &DeliveryOutcome::Aborted {
                reason: MISSED_WINDOW_REASON.to_string(),
            },
        )
    }

    /// Emit the current persisted state of a job. Read failures are logged, never raised.
    pub fn emit(&self, job_id: &JobId) {
        match self.store.get(job_id) {
            Ok(Some(job)) => {
                let event = JobStatusEvent::from(&job);
                match serde_json::to_value(&event) {
                    Ok(payload) => self.sink.emit(JOB_STATUS_EVENT, payload),
                    Err(e) => warn!(job_id = %job_id, error = %e, "status event not serializable"),
                }
            }
            Ok(None) => warn!(job_id = %job_id, "status event skipped: job vanished"),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "status event skipped: store read failed")
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::{tests::sample_job, SqliteJobStore};
    use blaster_core::{DeliveryResult, FailedRecipient, FailureKind};
    use chrono::Utc;
    use rusqlite::Connection;
    use std::sync::Mutex;

    /// Records every emitted event.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub events: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &str, payload: serde_json::Value) {
            self.events
                .lock()
                .unwrap()
                .push((event.to_string(), payload));
        }
    }

    fn setup() -> (Arc<SqliteJobStore>, Arc<RecordingSink>, ResultReporter) {
        let store = Arc::new(SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let sink = Arc::new(RecordingSink::default());
        let reporter = ResultReporter::new(store.clone(), sink.clone());
        (store, sink, reporter)
    }

    #[test]
    fn delivered_with_success_marks_sent_and_emits() {
        let (store, sink, reporter) = setup();
        let job = sample_job(Utc::now());
        store.insert(&job).unwrap();

        let result = DeliveryResult {
            total: 2,
            sent_to: vec!["081111111111".into()],
            failed_to: vec![FailedRecipient {
                recipient: "082222222222".into(),
                reason: FailureKind::Transport,
                detail: Some("timeout".into()),
            }],
            timestamp: Utc::now(),
        };
        let status = reporter
            .report(&job.id, &DeliveryOutcome::Delivered(result))
            .unwrap();
        assert_eq!(status, Some(JobStatus::Sent));

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, JOB_STATUS_EVENT);
        assert_eq!(events[0].1["status"], "sent");
        assert_eq!(events[0].1["delivery_result"]["sent_to"][0], "081111111111");
    }

    #[test]
    fn missed_window_fails_with_reason() {
        let (store, sink, reporter) = setup();
        let job = sample_job(Utc::now());
        store.insert(&job).unwrap();

        assert_eq!(
            reporter.report_missed(&job.id).unwrap(),
            Some(JobStatus::Failed)
        );
        let loaded = store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded.failure_reason.as_deref(), Some(MISSED_WINDOW_REASON));
        assert!(loaded.delivery_result.is_none());
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn second_report_is_ignored() {
        let (store, sink, reporter) = setup();
        let job = sample_job(Utc::now());
        store.insert(&job).unwrap();
        store.cancel(&job.id).unwrap();

        assert_eq!(reporter.report_missed(&job.id).unwrap(), None);
        assert_eq!(
            store.get(&job.id).unwrap().unwrap().status,
            JobStatus::Cancelled
        );
        assert!(sink.events.lock().unwrap().is_empty());
    }
}
