//! The interface for the resolver engine: the process which actually
//! performs DNS over TLS resolution.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error("resolver exited with {0}")]
    Exited(std::process::ExitStatus),

    #[error(transparent)]
    Other(anyhow::Error),
}

/// A started resolver process.
#[derive(Debug)]
pub struct Process {
    /// Lines the process writes to its standard output.
    pub stdout: mpsc::Receiver<String>,

    /// Lines the process writes to its standard error.
    pub stderr: mpsc::Receiver<String>,

    /// Yields exactly one value, once the process has exited.
    ///
    /// `Ok(())` is sent when the process exits because its cancellation
    /// token was cancelled. Anything else describes an unexpected exit.
    pub exited: oneshot::Receiver<Result<(), Error>>,
}

/// Starts the resolver.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Starts the resolver process.
    ///
    /// The process must keep running until `token` is cancelled, at which
    /// point it is stopped and [Process::exited] fires.
    async fn start(&self, token: CancellationToken, verbosity: u8) -> Result<Process, Error>;
}

pub type SharedEngine = Arc<dyn Engine>;
