use crate::report::ErrorChain;
use crate::timer;

use rand::Rng;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

pub trait ExponentialBackoff: Sized {
    fn add_spread(&self, spread: Duration) -> Self;
    fn exponential_backoff(&self) -> Self;
}

impl ExponentialBackoff for Duration {
    fn add_spread(&self, spread: Duration) -> Self {
        if spread.is_zero() {
            return *self;
        }
        let spread = rand::rng().random_range(0..spread.as_nanos());
        self.saturating_add(Duration::from_nanos(
            u64::try_from(spread).unwrap_or(u64::MAX),
        ))
    }

    fn exponential_backoff(&self) -> Self {
        self.saturating_mul(2)
    }
}

/// Tracks how long to wait before the next attempt at bringing the
/// resolver back online.
#[derive(Debug)]
pub(crate) struct Backoff {
    default: Duration,
    spread: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(default: Duration, spread: Duration) -> Self {
        Self {
            default,
            spread,
            current: default,
        }
    }

    /// The delay the next call to [Self::wait] will use, before spread.
    #[cfg(test)]
    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.default;
    }

    /// Logs `err`, then sleeps for the current delay unless `token` is
    /// cancelled first.
    ///
    /// The stored delay doubles before sleeping, so consecutive calls
    /// wait longer and longer until [Self::reset] is called.
    pub(crate) async fn wait(
        &mut self,
        token: &CancellationToken,
        err: Option<&(dyn std::error::Error + Send + Sync + 'static)>,
    ) {
        if let Some(err) = err {
            event!(Level::WARN, err = %ErrorChain(err), "resolver setup failed");
        }
        let delay = self.current;
        event!(Level::INFO, "attempting restart in {delay:?}");
        self.current = self.current.exponential_backoff();

        let _ = timer::sleep_or_cancel(delay.add_spread(self.spread), token).await;
    }
}
