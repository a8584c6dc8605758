//! Points DNS at a plaintext nameserver when the encrypted path is not
//! available.

use crate::nameserver::SharedNameserver;
use crate::report::ErrorChain;
use crate::settings::Settings;
use crate::supervisor::Stats;

use std::net::IpAddr;
use std::sync::atomic::Ordering;
use tracing::{event, Level};

/// Picks the plaintext nameserver to use.
///
/// A user-provided address wins; otherwise the first provider's first
/// IPv4 address is used.
pub(crate) fn plaintext_target(settings: &Settings) -> Option<IpAddr> {
    settings.plaintext_address.or_else(|| {
        settings
            .resolver
            .providers
            .first()
            .and_then(|provider| provider.plaintext_address())
    })
}

pub(crate) struct Fallback {
    pub(crate) nameserver: SharedNameserver,
    pub(crate) stats: Stats,
}

impl Fallback {
    /// Switches internal and system-wide DNS to plaintext.
    ///
    /// `is_fallback` only changes what is logged: whether this replaces a
    /// failed encrypted path, or is the default while none is wanted yet.
    pub(crate) async fn use_unencrypted_dns(&self, settings: &Settings, is_fallback: bool) {
        if is_fallback {
            self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.plaintext_defaults.fetch_add(1, Ordering::Relaxed);
        }

        let Some(target) = plaintext_target(settings) else {
            event!(
                Level::ERROR,
                "no plaintext DNS address available: no address set and no provider has an IPv4 address"
            );
            return;
        };

        if is_fallback {
            event!(Level::INFO, "falling back on plaintext DNS at address {target}");
        } else {
            event!(Level::INFO, "using plaintext DNS at address {target}");
        }

        self.nameserver.use_internally(target);
        if let Err(err) = self
            .nameserver
            .use_system_wide(target, settings.keep_nameserver)
            .await
        {
            event!(Level::ERROR, err = %ErrorChain(&err), "cannot set system-wide DNS");
        }
    }
}
