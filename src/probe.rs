//! The interface for checking that a resolver answers queries.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum Error {
    #[error("DNS probe cancelled")]
    Cancelled,

    #[error("DNS probe timed out")]
    TimedOut,

    #[error(transparent)]
    Other(anyhow::Error),
}

/// Confirms that DNS resolution works.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns once a query has been answered.
    ///
    /// Implementations retry failed queries until `token` is cancelled,
    /// returning [Error::Cancelled] in that case.
    async fn wait_until_answering(&self, token: &CancellationToken) -> Result<(), Error>;
}

pub type SharedProber = Arc<dyn Prober>;
