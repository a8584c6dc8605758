//! Implementation of [Prober] which performs real DNS lookups.

use crate::probe::{Error, Prober};
use crate::timer::{self, Sleep};

use async_trait::async_trait;
use hickory_resolver::config::LookupIpStrategy;
use hickory_resolver::config::NameServerConfig;
use hickory_resolver::config::Protocol;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::config::ResolverOpts;
use hickory_resolver::TokioAsyncResolver;
use std::net::SocketAddr;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

/// The name looked up by [DnsProber::new].
pub const DEFAULT_NAME: &str = "github.com";

/// How long [DnsProber::new] waits between failed lookups.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// How long a single lookup may take.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Looks up a well-known name on one nameserver until it answers.
pub struct DnsProber {
    resolver: TokioAsyncResolver,
    name: String,
    retry_interval: Duration,
}

impl DnsProber {
    /// Creates a prober querying the nameserver at `address` over UDP.
    pub fn new(address: SocketAddr) -> Self {
        Self::with_query_timeout(address, DEFAULT_QUERY_TIMEOUT)
    }

    pub fn with_query_timeout(address: SocketAddr, query_timeout: Duration) -> Self {
        let mut rc = ResolverConfig::new();
        rc.add_name_server(NameServerConfig {
            socket_addr: address,
            protocol: Protocol::Udp,
            tls_dns_name: None,
            trust_negative_responses: false,
            bind_addr: None,
        });
        let mut opts = ResolverOpts::default();
        opts.use_hosts_file = false;
        opts.ip_strategy = LookupIpStrategy::Ipv4Only;
        // Every probe must reach the nameserver.
        opts.cache_size = 0;
        opts.attempts = 1;
        opts.timeout = query_timeout;
        opts.edns0 = false;
        Self {
            resolver: TokioAsyncResolver::tokio(rc, opts),
            name: DEFAULT_NAME.to_string(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

#[async_trait]
impl Prober for DnsProber {
    #[instrument(skip_all, name = "DnsProber::wait_until_answering", fields(name = %self.name))]
    async fn wait_until_answering(&self, token: &CancellationToken) -> Result<(), Error> {
        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                result = self.resolver.lookup_ip(self.name.as_str()) => match result {
                    Ok(lookup) => {
                        event!(Level::DEBUG, addresses = ?lookup.iter().collect::<Vec<_>>(), "DNS answered");
                        return Ok(());
                    }
                    Err(err) => {
                        event!(Level::DEBUG, %err, "DNS is not answering yet");
                    }
                },
            }
            if timer::sleep_or_cancel(self.retry_interval, token).await == Sleep::Cancelled {
                return Err(Error::Cancelled);
            }
        }
    }
}
