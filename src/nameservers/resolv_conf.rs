//! Implementation of [Nameserver] which rewrites a resolv.conf file.

use crate::nameserver::{Error, Nameserver};

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{event, instrument, Level};

/// The system-wide resolver configuration on most Unix systems.
pub const DEFAULT_PATH: &str = "/etc/resolv.conf";

/// Points system-wide DNS at a nameserver through a resolv.conf file.
///
/// The process's own nameserver is published through a watch channel, for
/// whichever component of the process performs lookups.
pub struct ResolvConf {
    path: PathBuf,
    internal: watch::Sender<Option<IpAddr>>,
}

impl Default for ResolvConf {
    fn default() -> Self {
        Self::new(DEFAULT_PATH)
    }
}

impl ResolvConf {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (internal, _) = watch::channel(None);
        Self {
            path: path.into(),
            internal,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Observes the nameserver the process should use.
    pub fn internal(&self) -> watch::Receiver<Option<IpAddr>> {
        self.internal.subscribe()
    }
}

fn nameserver_of(line: &str) -> Option<&str> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("nameserver") => words.next(),
        _ => None,
    }
}

/// Rewrites resolv.conf `contents` to use `ip`.
///
/// `ip` always becomes the first nameserver. Other nameservers are dropped
/// unless `keep_existing` is set. Every other line is preserved.
fn rewrite(contents: &str, ip: IpAddr, keep_existing: bool) -> String {
    let ip_text = ip.to_string();
    let mut out = format!("nameserver {ip_text}\n");
    for line in contents.lines() {
        let keep = match nameserver_of(line) {
            Some(existing) => keep_existing && existing != ip_text,
            None => true,
        };
        if keep {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[async_trait]
impl Nameserver for ResolvConf {
    fn use_internally(&self, ip: IpAddr) {
        self.internal.send_replace(Some(ip));
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn use_system_wide(&self, ip: IpAddr, keep_existing: bool) -> Result<(), Error> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        tokio::fs::write(&self.path, rewrite(&contents, ip, keep_existing)).await?;
        event!(Level::DEBUG, "system-wide nameserver updated");
        Ok(())
    }
}
