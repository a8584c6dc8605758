//! Scheduling for periodic resolver restarts.

use crate::timer::Timer;

use tokio::time::{Duration, Instant};

/// Decides when the next periodic restart is due.
///
/// Changing the period mid-cycle keeps the progress already made since the
/// last tick, rather than starting a fresh period.
#[derive(Debug)]
pub(crate) struct Ticker {
    timer: Timer,
    last_tick: Option<Instant>,
}

impl Ticker {
    /// Creates a ticker which first fires after `period`, or never if the
    /// period is zero.
    pub(crate) fn new(period: Duration) -> Self {
        let mut ticker = Self {
            timer: Timer::disarmed(),
            last_tick: None,
        };
        ticker.rearm(period);
        ticker
    }

    /// Completes when a restart is due. Cancel-safe.
    pub(crate) async fn tick(&mut self) {
        self.timer.fired().await;
        self.last_tick = Some(Instant::now());
    }

    /// Arms the ticker for a full `period` from now.
    pub(crate) fn rearm(&mut self, period: Duration) {
        if period.is_zero() {
            self.timer.disarm();
        } else {
            self.timer.arm(period);
        }
    }

    /// Arms the ticker for whatever is left of `period` since the last
    /// tick. Fires immediately if that much time has already passed.
    pub(crate) fn reschedule(&mut self, period: Duration) {
        self.timer.disarm();
        if period.is_zero() {
            return;
        }
        let elapsed = self
            .last_tick
            .map(|last_tick| last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        self.timer.arm(period.saturating_sub(elapsed));
    }

    #[cfg(test)]
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }
}
