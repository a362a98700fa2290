use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use blaster_core::{Attachment, BroadcastJob, JobId, JobStatus};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SchedulerError},
    report::ResultReporter,
    schedule::{classify, FireWindow},
    store::JobStore,
};

/// Emitted by a timer when its job comes due.
///
/// `armed_for` is the `scheduled_at` the timer was created for; consumers
/// compare it with the stored job to drop fires made stale by an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredJob {
    pub job_id: JobId,
    pub armed_for: DateTime<Utc>,
}

/// Result of [`JobScheduler::arm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmOutcome {
    /// A timer is running and fires after this wait (zero for near-past jobs).
    Armed { fires_in: std::time::Duration },
    /// Too late to run; the job was failed without executing.
    Missed,
    /// The job is not `scheduled`; nothing armed.
    NotScheduled(JobStatus),
}

/// Summary of a startup recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    pub armed: usize,
    pub missed: usize,
}

/// Disposes of attachment files that no delivery will read again.
///
/// Called from synchronous scheduler paths (missed window, cancel, edit);
/// implementations hand the file I/O off to a task.
pub trait AttachmentSweeper: Send + Sync {
    fn sweep(&self, job_id: &JobId, attachments: Vec<Attachment>);
}

struct Timer {
    armed_for: DateTime<Utc>,
    handle: JoinHandle<()>,
    running: bool,
}

/// Owns one timer per scheduled job.
///
/// Timers never execute anything themselves: they push a [`FiredJob`] onto
/// the delivery queue, which a single worker drains in order. Terminal status
/// writes go through the [`ResultReporter`].
pub struct JobScheduler {
    store: Arc<dyn JobStore>,
    reporter: Arc<ResultReporter>,
    fired_tx: mpsc::Sender<FiredJob>,
    grace: chrono::Duration,
    sweeper: Option<Arc<dyn AttachmentSweeper>>,
    timers: Mutex<HashMap<JobId, Timer>>,
}

impl JobScheduler {
    /// Create a scheduler. Fired jobs are delivered on `fired_tx`.
    pub fn new(
        store: Arc<dyn JobStore>,
        reporter: Arc<ResultReporter>,
        grace: chrono::Duration,
        fired_tx: mpsc::Sender<FiredJob>,
    ) -> Self {
        Self {
            store,
            reporter,
            fired_tx,
            grace,
            sweeper: None,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Delete attachments of jobs that end without reaching the worker, and
    /// of attachments an edit drops.
    pub fn with_sweeper(mut self, sweeper: Arc<dyn AttachmentSweeper>) -> Self {
        self.sweeper = Some(sweeper);
        self
    }

    /// Start a timer for `job`, replacing any timer already held for its id.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm(&self, job: &BroadcastJob) -> Result<ArmOutcome> {
        if self.is_running(&job.id) {
            return Err(SchedulerError::Running {
                id: job.id.to_string(),
            });
        }
        self.disarm(&job.id);

        if job.status != JobStatus::Scheduled {
            debug!(job_id = %job.id, status = %job.status, "not arming terminal job");
            return Ok(ArmOutcome::NotScheduled(job.status));
        }

        let wait = match classify(job.scheduled_at, Utc::now(), self.grace) {
            FireWindow::Future(wait) => wait,
            FireWindow::Due => std::time::Duration::ZERO,
            FireWindow::Missed { late_by } => {
                warn!(
                    job_id = %job.id,
                    late_by_secs = late_by.num_seconds(),
                    "job missed its schedule window"
                );
                if self.reporter.report_missed(&job.id)?.is_some() {
                    self.sweep(&job.id, job.attachments.clone());
                }
                return Ok(ArmOutcome::Missed);
            }
        };

        let fired = FiredJob {
            job_id: job.id.clone(),
            armed_for: job.scheduled_at,
        };
        let tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let job_id = fired.job_id.clone();
            if tx.send(fired).await.is_err() {
                warn!(job_id = %job_id, "delivery queue closed, fire dropped");
            }
        });

        self.timers().insert(
            job.id.clone(),
            Timer {
                armed_for: job.scheduled_at,
                handle,
                running: false,
            },
        );
        info!(job_id = %job.id, fires_in_secs = wait.as_secs(), "job armed");
        Ok(ArmOutcome::Armed { fires_in: wait })
    }

    /// Stop the timer for `id`, if any. Never touches persisted state.
    ///
    /// Returns whether a timer was held for the job.
    pub fn disarm(&self, id: &JobId) -> bool {
        match self.timers().remove(id) {
            Some(timer) => {
                timer.handle.abort();
                debug!(job_id = %id, "job disarmed");
                true
            }
            None => false,
        }
    }

    /// Claim a fire for execution.
    ///
    /// Returns `false` when the fire is stale: its timer was disarmed, or
    /// re-armed for another time, since it was sent. Once claimed the job
    /// can be neither cancelled nor edited until [`release`](Self::release).
    pub fn begin(&self, fired: &FiredJob) -> bool {
        match self.timers().get_mut(&fired.job_id) {
            Some(timer) if timer.armed_for == fired.armed_for => {
                timer.running = true;
                true
            }
            _ => false,
        }
    }

    /// Persist an edit of a scheduled job and re-arm it for its new time.
    ///
    /// Refused while the job is being delivered. Attachments the edit
    /// removed are swept.
    pub fn reschedule(&self, job: &BroadcastJob) -> Result<ArmOutcome> {
        let dropped = {
            let timers = self.timers();
            if timers.get(&job.id).is_some_and(|t| t.running) {
                return Err(SchedulerError::Running {
                    id: job.id.to_string(),
                });
            }
            let previous = self.store.get(&job.id)?;
            self.store.update_scheduled(job)?;
            previous
                .map(|old| dropped_attachments(&old, job))
                .unwrap_or_default()
        };
        self.sweep(&job.id, dropped);
        self.arm(job)
    }

    /// Drop the timer handle for a fire that has been fully processed.
    ///
    /// A handle re-armed for a different `scheduled_at` in the meantime is kept.
    pub fn release(&self, fired: &FiredJob) {
        let mut timers = self.timers();
        if timers
            .get(&fired.job_id)
            .is_some_and(|t| t.armed_for == fired.armed_for)
        {
            timers.remove(&fired.job_id);
        }
    }

    /// Cancel a scheduled job: persist `cancelled` and stop its timer.
    ///
    /// Idempotent: cancelling a fired, cancelled or unknown job changes nothing
    /// and returns `false`. A job already claimed by the worker runs to
    /// completion and is not cancelled either.
    pub fn cancel(&self, id: &JobId) -> Result<bool> {
        let cancelled = {
            let mut timers = self.timers();
            if timers.get(id).is_some_and(|t| t.running) {
                info!(job_id = %id, "cancel refused: delivery in progress");
                return Ok(false);
            }
            let cancelled = self.store.cancel(id)?;
            if cancelled {
                if let Some(timer) = timers.remove(id) {
                    timer.handle.abort();
                }
            }
            cancelled
        };
        if cancelled {
            info!(job_id = %id, "job cancelled");
            self.reporter.emit(id);
            match self.store.get(id) {
                Ok(Some(job)) => self.sweep(id, job.attachments),
                Ok(None) => {}
                Err(e) => warn!(job_id = %id, error = %e, "attachments of cancelled job not swept"),
            }
        }
        Ok(cancelled)
    }

    /// Re-arm every persisted `scheduled` job. Run once at process start.
    pub fn recover_pending(&self) -> Result<Recovery> {
        let mut recovery = Recovery::default();
        for job in self.store.list_by_status(JobStatus::Scheduled)? {
            match self.arm(&job)? {
                ArmOutcome::Armed { .. } => recovery.armed += 1,
                ArmOutcome::Missed => recovery.missed += 1,
                ArmOutcome::NotScheduled(_) => {}
            }
        }
        info!(
            armed = recovery.armed,
            missed = recovery.missed,
            "pending jobs recovered"
        );
        Ok(recovery)
    }

    pub fn is_armed(&self, id: &JobId) -> bool {
        self.timers().contains_key(id)
    }

    /// Whether the worker is delivering this job right now.
    pub fn is_running(&self, id: &JobId) -> bool {
        self.timers().get(id).is_some_and(|t| t.running)
    }

    pub fn armed_count(&self) -> usize {
        self.timers().len()
    }

    /// Abort every timer. Persisted jobs stay `scheduled` and are recovered on next start.
    pub fn shutdown(&self) {
        let mut timers = self.timers();
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        info!("scheduler timers stopped");
    }

    fn sweep(&self, id: &JobId, attachments: Vec<Attachment>) {
        if attachments.is_empty() {
            return;
        }
        match &self.sweeper {
            Some(sweeper) => sweeper.sweep(id, attachments),
            None => debug!(job_id = %id, count = attachments.len(), "no sweeper, files kept"),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<JobId, Timer>> {
        // Timer entries stay consistent even if a holder panicked.
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Attachments of `old` that `new` no longer references.
fn dropped_attachments(old: &BroadcastJob, new: &BroadcastJob) -> Vec<Attachment> {
    old.attachments
        .iter()
        .filter(|a| {
            !new.attachments
                .iter()
                .any(|b| b.storage_path == a.storage_path)
        })
        .cloned()
        .collect()
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        let timers = self
            .timers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::RecordingSink;
    use crate::report::MISSED_WINDOW_REASON;
    use crate::store::{tests::sample_job, SqliteJobStore};
    use blaster_core::DeliveryResult;
    use chrono::Duration;
    use rusqlite::Connection;

    /// Records swept storage paths instead of deleting anything.
    #[derive(Default)]
    struct RecordingSweeper(Mutex<Vec<String>>);

    impl AttachmentSweeper for RecordingSweeper {
        fn sweep(&self, _job_id: &JobId, attachments: Vec<Attachment>) {
            self.0
                .lock()
                .unwrap()
                .extend(attachments.into_iter().map(|a| a.storage_path));
        }
    }

    struct Harness {
        store: Arc<SqliteJobStore>,
        scheduler: JobScheduler,
        rx: mpsc::Receiver<FiredJob>,
        sink: Arc<RecordingSink>,
        sweeper: Arc<RecordingSweeper>,
    }

    impl Harness {
        fn swept(&self) -> Vec<String> {
            self.sweeper.0.lock().unwrap().clone()
        }
    }

    fn harness() -> Harness {
        let store = Arc::new(SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let sink = Arc::new(RecordingSink::default());
        let reporter = Arc::new(ResultReporter::new(store.clone(), sink.clone()));
        let sweeper = Arc::new(RecordingSweeper::default());
        let (tx, rx) = mpsc::channel(16);
        let scheduler = JobScheduler::new(store.clone(), reporter, Duration::seconds(60), tx)
            .with_sweeper(sweeper.clone());
        Harness {
            store,
            scheduler,
            rx,
            sink,
            sweeper,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn future_job_fires_at_its_time() {
        let mut h = harness();
        let job = sample_job(Utc::now() + Duration::seconds(5));
        h.store.insert(&job).unwrap();

        let start = tokio::time::Instant::now();
        let outcome = h.scheduler.arm(&job).unwrap();
        assert!(matches!(outcome, ArmOutcome::Armed { .. }));
        assert!(h.scheduler.is_armed(&job.id));

        let fired = h.rx.recv().await.unwrap();
        assert_eq!(fired.job_id, job.id);
        assert_eq!(fired.armed_for, job.scheduled_at);
        assert!(start.elapsed() >= std::time::Duration::from_secs(4));

        h.scheduler.release(&fired);
        assert!(!h.scheduler.is_armed(&job.id));
    }

    #[tokio::test(start_paused = true)]
    async fn near_past_job_fires_immediately() {
        let mut h = harness();
        let job = sample_job(Utc::now() - Duration::seconds(30));
        h.store.insert(&job).unwrap();

        assert_eq!(
            h.scheduler.arm(&job).unwrap(),
            ArmOutcome::Armed {
                fires_in: std::time::Duration::ZERO
            }
        );
        assert_eq!(h.rx.recv().await.unwrap().job_id, job.id);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_previous_timer() {
        let mut h = harness();
        let mut job = sample_job(Utc::now() + Duration::seconds(10));
        h.store.insert(&job).unwrap();
        h.scheduler.arm(&job).unwrap();

        job.scheduled_at = Utc::now() + Duration::seconds(20);
        h.store.update_scheduled(&job).unwrap();
        h.scheduler.arm(&job).unwrap();
        assert_eq!(h.scheduler.armed_count(), 1);

        let fired = h.rx.recv().await.unwrap();
        assert_eq!(fired.armed_for, job.scheduled_at);

        let second =
            tokio::time::timeout(std::time::Duration::from_secs(120), h.rx.recv()).await;
        assert!(second.is_err(), "job fired twice");
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_job_never_fires() {
        let mut h = harness();
        let job = sample_job(Utc::now() + Duration::seconds(5));
        h.store.insert(&job).unwrap();
        h.scheduler.arm(&job).unwrap();

        assert!(h.scheduler.disarm(&job.id));
        assert!(!h.scheduler.disarm(&job.id));
        let fired = tokio::time::timeout(std::time::Duration::from_secs(30), h.rx.recv()).await;
        assert!(fired.is_err());
        assert_eq!(
            h.store.get(&job.id).unwrap().unwrap().status,
            JobStatus::Scheduled
        );
    }

    #[tokio::test]
    async fn stale_job_is_failed_without_timer() {
        let h = harness();
        let job = sample_job(Utc::now() - Duration::minutes(2));
        h.store.insert(&job).unwrap();

        assert_eq!(h.scheduler.arm(&job).unwrap(), ArmOutcome::Missed);
        assert!(!h.scheduler.is_armed(&job.id));
        let loaded = h.store.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.failure_reason.as_deref(), Some(MISSED_WINDOW_REASON));
        assert_eq!(h.swept(), vec!["flyer.png".to_string()]);
    }

    #[tokio::test]
    async fn terminal_job_is_not_armed() {
        let h = harness();
        let mut job = sample_job(Utc::now() + Duration::seconds(5));
        job.status = JobStatus::Sent;
        assert_eq!(
            h.scheduler.arm(&job).unwrap(),
            ArmOutcome::NotScheduled(JobStatus::Sent)
        );
        assert_eq!(h.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let h = harness();
        let job = sample_job(Utc::now() + Duration::hours(1));
        h.store.insert(&job).unwrap();
        h.scheduler.arm(&job).unwrap();

        assert!(h.scheduler.cancel(&job.id).unwrap());
        assert!(!h.scheduler.is_armed(&job.id));
        assert!(!h.scheduler.cancel(&job.id).unwrap());
        assert!(!h.scheduler.cancel(&JobId::from("unknown")).unwrap());
        assert_eq!(
            h.store.get(&job.id).unwrap().unwrap().status,
            JobStatus::Cancelled
        );
        assert_eq!(h.swept(), vec!["flyer.png".to_string()]);
    }

    #[tokio::test]
    async fn completed_meeting_job_is_left_alone() {
        let h = harness();
        let mut job = sample_job(Utc::now() + Duration::minutes(5));
        job.job_type = blaster_core::JobType::Meeting;
        job.ends_at = Some(job.scheduled_at + Duration::hours(1));
        h.store.insert(&job).unwrap();
        h.store
            .update_status(&job.id, JobStatus::Completed, None, None)
            .unwrap();
        let stored = h.store.get(&job.id).unwrap().unwrap();

        assert_eq!(
            h.scheduler.arm(&stored).unwrap(),
            ArmOutcome::NotScheduled(JobStatus::Completed)
        );
        assert!(!h.scheduler.cancel(&job.id).unwrap());
        assert_eq!(h.scheduler.recover_pending().unwrap(), Recovery::default());
        assert_eq!(
            h.store.get(&job.id).unwrap().unwrap().status,
            JobStatus::Completed
        );
        assert!(h.swept().is_empty());
    }

    #[tokio::test]
    async fn cancel_after_send_changes_nothing() {
        let h = harness();
        let job = sample_job(Utc::now() - Duration::seconds(5));
        h.store.insert(&job).unwrap();
        let result = DeliveryResult {
            total: 2,
            sent_to: vec!["081111111111".into(), "082222222222".into()],
            failed_to: vec![],
            timestamp: Utc::now(),
        };
        h.store
            .update_status(&job.id, JobStatus::Sent, Some(&result), None)
            .unwrap();
        let before = h.store.get(&job.id).unwrap().unwrap();

        assert!(!h.scheduler.cancel(&job.id).unwrap());
        let after = h.store.get(&job.id).unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Sent);
        assert_eq!(after.delivery_result, before.delivery_result);
        assert_eq!(after.delivery_result.unwrap().sent_to.len(), 2);
        assert_eq!(after.updated_at, before.updated_at);
        assert!(h.sink.events.lock().unwrap().is_empty());
        assert!(h.swept().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_job_cannot_be_cancelled_or_edited() {
        let mut h = harness();
        let mut job = sample_job(Utc::now() + Duration::seconds(1));
        h.store.insert(&job).unwrap();
        h.scheduler.arm(&job).unwrap();

        let fired = h.rx.recv().await.unwrap();
        assert!(h.scheduler.begin(&fired));
        assert!(h.scheduler.is_running(&job.id));
        assert!(!h.scheduler.cancel(&job.id).unwrap());

        job.message_body = Some("changed".into());
        assert!(matches!(
            h.scheduler.reschedule(&job),
            Err(SchedulerError::Running { .. })
        ));
        assert_eq!(
            h.store.get(&job.id).unwrap().unwrap().message_body.as_deref(),
            Some("Halo")
        );

        h.scheduler.release(&fired);
        assert!(!h.scheduler.is_running(&job.id));
        assert!(h.scheduler.cancel(&job.id).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_fire_is_not_claimed() {
        let mut h = harness();
        let mut job = sample_job(Utc::now() + Duration::seconds(1));
        h.store.insert(&job).unwrap();
        h.scheduler.arm(&job).unwrap();
        let fired = h.rx.recv().await.unwrap();

        job.scheduled_at = Utc::now() + Duration::hours(1);
        h.scheduler.reschedule(&job).unwrap();
        assert!(!h.scheduler.begin(&fired));

        h.scheduler.disarm(&job.id);
        let late = FiredJob {
            job_id: job.id.clone(),
            armed_for: job.scheduled_at,
        };
        assert!(!h.scheduler.begin(&late));
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_persists_and_rearms() {
        let mut h = harness();
        let mut job = sample_job(Utc::now() + Duration::seconds(10));
        h.store.insert(&job).unwrap();
        h.scheduler.arm(&job).unwrap();

        job.scheduled_at = Utc::now() + Duration::seconds(30);
        job.message_body = Some("Rapat ditunda".into());
        assert!(matches!(
            h.scheduler.reschedule(&job).unwrap(),
            ArmOutcome::Armed { .. }
        ));
        let stored = h.store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.scheduled_at, job.scheduled_at);
        assert_eq!(stored.message_body.as_deref(), Some("Rapat ditunda"));

        let fired = h.rx.recv().await.unwrap();
        assert_eq!(fired.armed_for, job.scheduled_at);
        assert!(h.swept().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn edit_sweeps_only_dropped_attachments() {
        let h = harness();
        let mut job = sample_job(Utc::now() + Duration::minutes(10));
        h.store.insert(&job).unwrap();
        h.scheduler.arm(&job).unwrap();

        let mut agenda = job.attachments[0].clone();
        agenda.storage_path = "agenda.pdf".into();
        job.attachments.push(agenda.clone());
        h.scheduler.reschedule(&job).unwrap();
        assert!(h.swept().is_empty());

        job.attachments = vec![agenda];
        h.scheduler.reschedule(&job).unwrap();
        assert_eq!(h.swept(), vec!["flyer.png".to_string()]);
        assert_eq!(
            h.store.get(&job.id).unwrap().unwrap().attachments[0].storage_path,
            "agenda.pdf"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_fails_stale_and_rearms_future() {
        let mut h = harness();
        let stale = sample_job(Utc::now() - Duration::minutes(2));
        let future = sample_job(Utc::now() + Duration::hours(1));
        h.store.insert(&stale).unwrap();
        h.store.insert(&future).unwrap();

        let recovery = h.scheduler.recover_pending().unwrap();
        assert_eq!(recovery, Recovery { armed: 1, missed: 1 });
        assert_eq!(
            h.store.get(&stale.id).unwrap().unwrap().status,
            JobStatus::Failed
        );
        assert!(h.scheduler.is_armed(&future.id));

        let fired = h.rx.recv().await.unwrap();
        assert_eq!(fired.job_id, future.id);
        assert_eq!(fired.armed_for, future.scheduled_at);
    }
}
