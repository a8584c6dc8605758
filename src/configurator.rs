//! The interface for writing the resolver's files.

use crate::settings::ResolverSettings;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(anyhow::Error),
}

/// Writes the files the resolver reads at startup.
#[async_trait]
pub trait Configurator: Send + Sync {
    /// Downloads cryptographic material (root hints, trust anchors) the
    /// resolver needs.
    async fn setup_files(&self, token: &CancellationToken) -> Result<(), Error>;

    /// Writes the resolver configuration file.
    async fn write_config(&self, settings: &ResolverSettings) -> Result<(), Error>;
}

pub type SharedConfigurator = Arc<dyn Configurator>;
