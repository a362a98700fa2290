use std::collections::HashSet;
use std::sync::Arc;

use blaster_core::{
    config::ThrottleConfig, Attachment, BroadcastJob, DeliveryResult, FailedRecipient,
    FailureKind, PhoneRules,
};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    attach::AttachmentResolver,
    error::{DeliveryError, TransportError},
    storage::Storage,
    throttle::Throttler,
    transport::{MediaPayload, Transport, TransportSlot},
    validate::{RecipientValidator, Verdict},
};

/// Per-recipient state while a job runs.
#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Sent,
    Failed {
        reason: FailureKind,
        detail: Option<String>,
    },
}

/// Recorded for recipients a shutdown left unsent.
pub const INTERRUPTED_DETAIL: &str = "delivery interrupted by shutdown";

/// Deduplicated recipients of one job and what is left to check.
#[derive(Default)]
struct Roster {
    recipients: Vec<String>,
    slots: Vec<Slot>,
    /// Index into `recipients` plus the send-form address.
    to_check: Vec<(usize, String)>,
}

/// Runs one job: validate, send with pacing, aggregate.
///
/// Status is never written here; the caller hands the returned result to the
/// result reporter. Per-recipient problems end up in `failed_to`; only the
/// errors in [`DeliveryError`] abort the whole job.
pub struct DeliveryExecutor {
    transport: TransportSlot,
    resolver: AttachmentResolver,
    validator: RecipientValidator,
    throttler: Throttler,
}

impl DeliveryExecutor {
    pub fn new(
        transport: TransportSlot,
        resolver: AttachmentResolver,
        validator: RecipientValidator,
        throttler: Throttler,
    ) -> Self {
        Self {
            transport,
            resolver,
            validator,
            throttler,
        }
    }

    /// Wire the default resolver, validator and throttler around `transport`.
    pub fn assemble(
        transport: TransportSlot,
        storage: Arc<dyn Storage>,
        rules: PhoneRules,
        throttle: ThrottleConfig,
    ) -> Self {
        Self::new(
            transport,
            AttachmentResolver::new(storage),
            RecipientValidator::new(rules),
            Throttler::new(throttle),
        )
    }

    /// Cut pacing short once `stop` turns `true`. The recipient being sent
    /// to is finished; everyone after it is recorded as failed and the
    /// partial result is returned as usual.
    pub fn with_shutdown(mut self, stop: watch::Receiver<bool>) -> Self {
        self.throttler = self.throttler.interruptible(stop);
        self
    }

    pub async fn execute(&self, job: &BroadcastJob) -> Result<DeliveryResult, DeliveryError> {
        let transport = self.transport.current().ok_or(DeliveryError::NoTransport)?;

        // Validating
        debug!(job_id = %job.id, stage = "validating", "executor stage");
        let media = self.resolver.resolve(&job.attachments).await?;
        let Roster {
            recipients,
            mut slots,
            to_check,
        } = self.roster(job);
        let mut sendable: Vec<(usize, String)> = Vec::new();
        let mut answered = 0usize;
        let mut outage: Option<DeliveryError> = None;
        let mut interrupted = false;

        for (n, (i, address)) in to_check.into_iter().enumerate() {
            if n > 0 {
                self.throttler.validation_pause().await;
                if self.throttler.is_stopping() {
                    interrupted = true;
                    break;
                }
            }
            match self.validator.check(transport.as_ref(), &address).await {
                Ok(Verdict::Sendable { address }) => {
                    answered += 1;
                    sendable.push((i, address));
                }
                Ok(verdict) => {
                    answered += 1;
                    warn!(job_id = %job.id, recipient = %recipients[i], "recipient not reachable");
                    slots[i] = rejected(verdict);
                }
                Err(e @ DeliveryError::TransportUnavailable(_)) => {
                    warn!(
                        job_id = %job.id,
                        recipient = %recipients[i],
                        error = %e,
                        "reachability check failed"
                    );
                    slots[i] = Slot::Failed {
                        reason: FailureKind::Transport,
                        detail: Some(e.to_string()),
                    };
                    outage = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        // The provider never answered a single check: treat it as down.
        if answered == 0 {
            if let Some(e) = outage {
                return Err(e);
            }
        }

        // Sending
        if sendable.is_empty() {
            info!(job_id = %job.id, "no sendable recipients, skipping send loop");
        } else if !interrupted {
            debug!(job_id = %job.id, stage = "sending", count = sendable.len(), "executor stage");
        }
        let body = job
            .message_body
            .as_deref()
            .filter(|b| !b.trim().is_empty());
        let mut last_failed = false;
        for (n, (i, address)) in sendable.iter().enumerate() {
            if interrupted {
                break;
            }
            if n > 0 {
                self.throttler.recipient_pause(n, last_failed).await;
                if self.throttler.is_stopping() {
                    interrupted = true;
                    break;
                }
            }
            let outcome = self
                .send_all_parts(transport.as_ref(), address, body, &media)
                .await;
            last_failed = outcome.is_err();
            slots[*i] = match outcome {
                Ok(()) => {
                    debug!(job_id = %job.id, recipient = %recipients[*i], "recipient delivered");
                    Slot::Sent
                }
                Err(e) => {
                    warn!(job_id = %job.id, recipient = %recipients[*i], error = %e, "send failed");
                    Slot::Failed {
                        reason: FailureKind::Transport,
                        detail: Some(e.to_string()),
                    }
                }
            };
        }
        if interrupted {
            warn!(
                job_id = %job.id,
                "shutdown interrupted delivery, unsent recipients marked failed"
            );
        }

        // Aggregating
        debug!(job_id = %job.id, stage = "aggregating", "executor stage");
        let result = aggregate(&recipients, slots);
        info!(
            job_id = %job.id,
            total = result.total,
            sent = result.sent_to.len(),
            failed = result.failed_to.len(),
            "delivery finished"
        );
        Ok(result)
    }

    /// Delete the job's attachment files after its terminal outcome.
    pub async fn cleanup(&self, attachments: &[Attachment]) {
        self.resolver.cleanup(attachments).await;
    }

    /// Unique recipients in first-seen order, with format rejections settled.
    ///
    /// Two spellings of one number ("08…" and "628…") count once, so
    /// duplicates are detected on the send form.
    fn roster(&self, job: &BroadcastJob) -> Roster {
        let mut roster = Roster::default();
        let mut seen = HashSet::new();
        for raw in &job.recipients {
            let normalized = self.validator.normalize(raw);
            let key = match &normalized {
                Ok(address) => address.clone(),
                Err(_) => raw.clone(),
            };
            if !seen.insert(key) {
                debug!(job_id = %job.id, recipient = %raw, "duplicate recipient skipped");
                continue;
            }
            let i = roster.recipients.len();
            roster.recipients.push(raw.clone());
            match normalized {
                Ok(address) => {
                    roster.slots.push(Slot::Pending);
                    roster.to_check.push((i, address));
                }
                Err(verdict) => {
                    warn!(job_id = %job.id, recipient = %raw, "recipient has invalid format");
                    roster.slots.push(rejected(verdict));
                }
            }
        }
        roster
    }

    /// Text first, then each attachment in order. Stops at the first error.
    async fn send_all_parts(
        &self,
        transport: &dyn Transport,
        address: &str,
        body: Option<&str>,
        media: &[MediaPayload],
    ) -> Result<(), TransportError> {
        let mut parts_sent = 0usize;
        if let Some(body) = body {
            transport.send_text(address, body).await?;
            parts_sent += 1;
        }
        for payload in media {
            if parts_sent > 0 {
                self.throttler.part_pause().await;
            }
            transport.send_media(address, payload).await?;
            parts_sent += 1;
        }
        Ok(())
    }
}

fn rejected(verdict: Verdict) -> Slot {
    match verdict {
        Verdict::Rejected { reason, detail } => Slot::Failed { reason, detail },
        // normalize/check only hand back rejections on the error path
        Verdict::Sendable { .. } => Slot::Pending,
    }
}

/// Build the result in recipient input order.
fn aggregate(recipients: &[String], slots: Vec<Slot>) -> DeliveryResult {
    let mut sent_to = Vec::new();
    let mut failed_to = Vec::new();
    for (recipient, slot) in recipients.iter().zip(slots) {
        match slot {
            Slot::Sent => sent_to.push(recipient.clone()),
            Slot::Failed { reason, detail } => failed_to.push(FailedRecipient {
                recipient: recipient.clone(),
                reason,
                detail,
            }),
            // only left pending when shutdown stopped the run
            Slot::Pending => failed_to.push(FailedRecipient {
                recipient: recipient.clone(),
                reason: FailureKind::Transport,
                detail: Some(INTERRUPTED_DETAIL.to_string()),
            }),
        }
    }
    DeliveryResult {
        total: recipients.len(),
        sent_to,
        failed_to,
        timestamp: Utc::now(),
    }
}
