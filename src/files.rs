//! Refreshes the files the resolver reads: cryptographic material,
//! blocklists, and its configuration.

use crate::blocklist;
use crate::configurator;
use crate::report::ErrorChain;
use crate::settings::Settings;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot set up resolver files")]
    SetupFiles(#[source] configurator::Error),

    #[error("cannot write resolver configuration")]
    WriteConfig(#[source] configurator::Error),
}

pub(crate) struct Files {
    pub(crate) configurator: configurator::SharedConfigurator,
    pub(crate) blocklists: blocklist::SharedBuilder,
}

impl Files {
    /// Regenerates every file the resolver needs, from `settings`.
    ///
    /// Blocklist sources which fail are logged and skipped. Any other
    /// failure aborts the refresh.
    #[instrument(skip_all, name = "Files::update")]
    pub(crate) async fn update(
        &self,
        token: &CancellationToken,
        settings: Settings,
    ) -> Result<(), Error> {
        event!(Level::INFO, "downloading DNS over TLS cryptographic files");
        self.configurator
            .setup_files(token)
            .await
            .map_err(Error::SetupFiles)?;

        event!(Level::INFO, "downloading hostnames and IP block lists");
        let built = self
            .blocklists
            .build_all(token, &settings.blocklist_build)
            .await;
        for err in &built.errors {
            event!(Level::WARN, err = %ErrorChain(err), "blocklist source failed");
        }

        let mut resolver = settings.resolver;
        resolver.blocklist.hostnames = built.hostnames;
        resolver.blocklist.ips = built.ips;
        resolver.blocklist.ip_prefixes = built.ip_prefixes;

        self.configurator
            .write_config(&resolver)
            .await
            .map_err(Error::WriteConfig)
    }
}
