use std::sync::Arc;
use std::time::Duration;

use blaster_core::{DeliveryOutcome, JobId, JobStatus};
use blaster_scheduler::{FiredJob, JobScheduler, JobStore, ResultReporter};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::executor::DeliveryExecutor;

/// Store reads and terminal writes are tried this many times.
const PERSIST_ATTEMPTS: u32 = 3;
/// Backoff before retry `n` is `n` times this.
const PERSIST_BACKOFF: Duration = Duration::from_millis(500);

/// Drains the fired-job queue one job at a time.
///
/// A single worker is the only consumer, so two jobs never share the
/// transport and the per-account pacing holds across jobs.
pub struct DeliveryWorker {
    store: Arc<dyn JobStore>,
    scheduler: Arc<JobScheduler>,
    reporter: Arc<ResultReporter>,
    executor: DeliveryExecutor,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: Arc<JobScheduler>,
        reporter: Arc<ResultReporter>,
        executor: DeliveryExecutor,
    ) -> Self {
        Self {
            store,
            scheduler,
            reporter,
            executor,
        }
    }

    /// Main loop. Runs until the queue closes or `shutdown` broadcasts `true`.
    ///
    /// A job already executing is finished before shutdown is observed. Give
    /// the executor the same signal ([`DeliveryExecutor::with_shutdown`]) so
    /// its pacing is cut short and the partial result gets recorded.
    pub async fn run(self, mut rx: mpsc::Receiver<FiredJob>, mut shutdown: watch::Receiver<bool>) {
        info!("delivery worker started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("delivery worker shutting down");
                        break;
                    }
                }
                fired = rx.recv() => match fired {
                    Some(fired) => {
                        self.process(fired).await;
                    }
                    None => {
                        info!("delivery queue closed");
                        break;
                    }
                },
            }
        }
    }

    /// Execute one fire end to end and return the terminal status written,
    /// or `None` when the fire was skipped.
    pub async fn process(&self, fired: FiredJob) -> Option<JobStatus> {
        if !self.scheduler.begin(&fired) {
            debug!(job_id = %fired.job_id, "stale fire skipped");
            return None;
        }
        let status = self.deliver(&fired).await;
        self.scheduler.release(&fired);
        status
    }

    async fn deliver(&self, fired: &FiredJob) -> Option<JobStatus> {
        let loaded = persist(&fired.job_id, "load job", || self.store.get(&fired.job_id)).await;
        let job = match loaded {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %fired.job_id, "fired job no longer exists");
                return None;
            }
            Err(e) => {
                error!(job_id = %fired.job_id, error = %e, "failed to load fired job");
                return None;
            }
        };
        if job.status != JobStatus::Scheduled {
            debug!(job_id = %job.id, status = %job.status, "fired job already terminal");
            return None;
        }
        if job.scheduled_at != fired.armed_for {
            debug!(job_id = %job.id, "fire predates an edit, skipped");
            return None;
        }

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            recipients = job.recipients.len(),
            "delivering job"
        );
        let outcome = match self.executor.execute(&job).await {
            Ok(result) => DeliveryOutcome::Delivered(result),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job aborted before sending");
                DeliveryOutcome::Aborted {
                    reason: e.to_string(),
                }
            }
        };

        let reported = persist(&job.id, "record outcome", || {
            self.reporter.report(&job.id, &outcome)
        })
        .await;
        match reported {
            Ok(Some(status)) => {
                self.executor.cleanup(&job.attachments).await;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                // The row stays `scheduled`; the outcome survives only in this log line.
                error!(
                    job_id = %job.id,
                    error = %e,
                    outcome = ?outcome,
                    "failed to record delivery outcome"
                );
                None
            }
        }
    }
}

/// Run a store operation, retrying with linear backoff on error.
async fn persist<T>(
    job_id: &JobId,
    what: &'static str,
    mut op: impl FnMut() -> blaster_scheduler::Result<T>,
) -> blaster_scheduler::Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < PERSIST_ATTEMPTS => {
                warn!(
                    job_id = %job_id,
                    op = what,
                    attempt,
                    error = %e,
                    "store call failed, retrying"
                );
                tokio::time::sleep(PERSIST_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
