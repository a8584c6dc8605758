//! Configuration options which can alter the behavior of the supervisor.

use std::net::{IpAddr, Ipv4Addr};
use tokio::time::Duration;

/// How long to wait before the first retry after a failure.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// How long a freshly started resolver has to answer its first query.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the resolver listens.
pub const DEFAULT_RESOLVER_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Policy which is applicable to a supervisor.
#[derive(Clone, Debug)]
pub struct Policy {
    /// Delay before retrying after the first failure. Doubles with each
    /// consecutive failure, and resets once the resolver is confirmed
    /// running.
    ///
    /// Default: 10 seconds
    pub backoff: Duration,

    /// Random delay added on top of each backoff wait.
    ///
    /// Default: zero
    pub backoff_spread: Duration,

    /// How long to wait for a started resolver to answer queries before
    /// giving up on it.
    ///
    /// Default: 60 seconds
    pub probe_timeout: Duration,

    /// The address the resolver listens on. Internal and system-wide DNS
    /// point here while the resolver is running.
    ///
    /// Default: 127.0.0.1
    pub resolver_address: IpAddr,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            backoff_spread: Duration::ZERO,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            resolver_address: DEFAULT_RESOLVER_ADDRESS,
        }
    }
}
