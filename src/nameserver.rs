//! The interface for pointing DNS resolution at a nameserver.

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(anyhow::Error),
}

/// Controls which nameserver the process and the system use.
#[async_trait]
pub trait Nameserver: Send + Sync {
    /// Points the process's own resolution at `ip`.
    fn use_internally(&self, ip: IpAddr);

    /// Points system-wide resolution at `ip`.
    ///
    /// If `keep_existing` is set, previously configured nameservers are
    /// kept after `ip` instead of being replaced.
    async fn use_system_wide(&self, ip: IpAddr, keep_existing: bool) -> Result<(), Error>;
}

pub type SharedNameserver = Arc<dyn Nameserver>;
