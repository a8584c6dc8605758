//! The interface for fetching blocklists.

use crate::settings::{BlocklistBuildSettings, IpPrefix};

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot fetch blocklist from {source_name}")]
    Fetch {
        source_name: String,
        #[source]
        err: anyhow::Error,
    },

    #[error(transparent)]
    Other(anyhow::Error),
}

/// The union of every blocklist which could be fetched.
#[derive(Debug, Default)]
pub struct BuildResult {
    pub hostnames: Vec<String>,
    pub ips: Vec<IpAddr>,
    pub ip_prefixes: Vec<IpPrefix>,

    /// One entry per source which could not be fetched or parsed.
    ///
    /// These are not fatal: the lists above still hold everything the
    /// other sources provided.
    pub errors: Vec<Error>,
}

/// Builds blocklists from remote sources.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build_all(
        &self,
        token: &CancellationToken,
        settings: &BlocklistBuildSettings,
    ) -> BuildResult;
}

pub type SharedBuilder = Arc<dyn Builder>;
