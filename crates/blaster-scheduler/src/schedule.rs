use chrono::{DateTime, Utc};

/// Where `scheduled_at` sits relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireWindow {
    /// Still ahead; wait this long.
    Future(std::time::Duration),
    /// Due now or late by no more than the grace period: fire immediately.
    Due,
    /// Late by more than the grace period.
    Missed { late_by: chrono::Duration },
}

/// Classify `scheduled_at` against `now` with a `grace` tolerance for lateness.
pub fn classify(
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
    grace: chrono::Duration,
) -> FireWindow {
    let delta = scheduled_at - now;
    if delta > chrono::Duration::zero() {
        // to_std only fails on negative durations
        return delta
            .to_std()
            .map(FireWindow::Future)
            .unwrap_or(FireWindow::Due);
    }
    let late_by = -delta;
    if late_by > grace {
        FireWindow::Missed { late_by }
    } else {
        FireWindow::Due
    }
}
