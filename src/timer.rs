//! Timed waits which respect cancellation.

use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How a [sleep_or_cancel] call ended.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Sleep {
    Elapsed,
    Cancelled,
}

/// Sleeps for `duration`, returning early if `token` is cancelled.
///
/// Dropping a tokio timer deregisters it, so nothing is left behind when
/// cancellation wins the race.
pub(crate) async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> Sleep {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Sleep::Elapsed,
        _ = token.cancelled() => Sleep::Cancelled,
    }
}

/// A one-shot timer which may be armed, disarmed, and re-armed.
///
/// While disarmed, [Timer::fired] never completes.
#[derive(Debug, Default)]
pub(crate) struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub(crate) fn disarmed() -> Self {
        Self { deadline: None }
    }

    pub(crate) fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub(crate) fn disarm(&mut self) {
        self.deadline = None;
    }

    #[cfg(test)]
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Completes once the deadline passes, disarming the timer.
    ///
    /// Cancel-safe: if dropped before completion, the timer stays armed.
    pub(crate) async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => futures::future::pending().await,
        }
    }
}
