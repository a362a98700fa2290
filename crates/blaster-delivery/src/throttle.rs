use std::time::Duration;

use blaster_core::config::ThrottleConfig;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info};

/// Pacing between provider calls, to keep the sending account below the
/// provider's abuse heuristics.
///
/// Shape of one job:
///
/// ```text
/// check ─ v ─ check ─ v ─ check            (v = validation_delay)
/// send(r1) ─ j ─ send(r2) ─ j ─ … ─ send(r20) ─ BATCH PAUSE ─ send(r21) …
///   └ text ─ a ─ media ─ a ─ media          (a = attachment jitter)
/// ```
///
/// `j` is drawn from the message window; after a failed recipient the
/// window's maximum is used instead.
///
/// An interruptible throttler wakes from any pause as soon as its stop
/// signal turns `true`; callers check [`is_stopping`](Self::is_stopping)
/// after each pause.
#[derive(Debug, Clone)]
pub struct Throttler {
    cfg: ThrottleConfig,
    stop: Option<watch::Receiver<bool>>,
}

impl Throttler {
    pub fn new(cfg: ThrottleConfig) -> Self {
        Self { cfg, stop: None }
    }

    pub fn interruptible(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.as_ref().is_some_and(|stop| *stop.borrow())
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.cfg
    }

    /// Between two reachability checks.
    pub async fn validation_pause(&self) {
        self.pause(Duration::from_millis(self.cfg.validation_delay_ms)).await;
    }

    /// Between two parts (text, media) sent to the same recipient.
    pub async fn part_pause(&self) {
        self.pause(self.part_delay()).await;
    }

    /// After the `completed`-th recipient, before the next one.
    pub async fn recipient_pause(&self, completed: usize, had_error: bool) {
        let delay = self.recipient_delay(completed, had_error);
        if self.is_batch_boundary(completed) {
            info!(
                completed,
                pause_secs = delay.as_secs(),
                "batch limit reached, pausing"
            );
        } else {
            debug!(completed, had_error, delay_ms = delay.as_millis() as u64, "recipient pause");
        }
        self.pause(delay).await;
    }

    pub fn part_delay(&self) -> Duration {
        jitter(self.cfg.attachment_delay_min_ms, self.cfg.attachment_delay_max_ms)
    }

    /// Delay owed after `completed` recipients have been attempted.
    pub fn recipient_delay(&self, completed: usize, had_error: bool) -> Duration {
        if self.is_batch_boundary(completed) {
            Duration::from_secs(self.cfg.batch_pause_secs)
        } else if had_error {
            Duration::from_millis(self.cfg.message_delay_min_ms.max(self.cfg.message_delay_max_ms))
        } else {
            jitter(self.cfg.message_delay_min_ms, self.cfg.message_delay_max_ms)
        }
    }

    fn is_batch_boundary(&self, completed: usize) -> bool {
        self.cfg.batch_size > 0 && completed > 0 && completed % self.cfg.batch_size == 0
    }

    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let Some(stop) = &self.stop else {
            tokio::time::sleep(delay).await;
            return;
        };
        let mut stop = stop.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            // a dropped sender disables this arm and the full delay is served
            Ok(_) = stop.wait_for(|stopping| *stopping) => {
                info!(delay_ms = delay.as_millis() as u64, "pause cut short by shutdown");
            }
        }
    }
}

/// Uniform draw from `[min_ms, max_ms]`; a reversed window is read as its sorted form.
fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    let (lo, hi) = if min_ms <= max_ms {
        (min_ms, max_ms)
    } else {
        (max_ms, min_ms)
    };
    if lo == hi {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}
