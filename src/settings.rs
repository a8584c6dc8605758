//! User-facing settings for the encrypted DNS path.
//!
//! The supervisor keeps its own copy of [Settings]; callers replace it
//! wholesale through [crate::supervisor::Supervisor::set_settings].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;

/// Everything the supervisor needs to know about the desired DNS setup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Settings {
    /// Whether encrypted (DNS over TLS) resolution is wanted at all.
    pub enabled: bool,

    /// A plaintext nameserver to use instead of the first provider's
    /// address, whenever encrypted resolution is unavailable.
    pub plaintext_address: Option<IpAddr>,

    /// Keep the nameservers already configured on the system, adding ours
    /// in front of them, rather than replacing them.
    pub keep_nameserver: bool,

    /// How often cryptographic files and blocklists are refreshed, forcing
    /// a resolver restart. Zero disables periodic refreshes.
    pub update_period: Duration,

    /// Which blocklists to fetch and how to amend them.
    pub blocklist_build: BlocklistBuildSettings,

    /// Settings handed to the resolver itself.
    pub resolver: ResolverSettings,
}

/// Settings handed to the resolver when writing its configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResolverSettings {
    /// Upstream DoT providers, in order of preference.
    pub providers: Vec<Provider>,
    pub verbosity_level: u8,
    /// Passed to [crate::engine::Engine::start].
    pub verbosity_details_level: u8,
    pub validation_log_level: u8,
    /// Port the resolver listens on, on the loopback address.
    pub listening_port: u16,
    pub caching: bool,
    pub ipv6: bool,
    /// Entries the resolver should refuse to resolve.
    ///
    /// Overwritten with freshly built blocklists on each files refresh.
    pub blocklist: Blocklist,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            providers: vec![],
            verbosity_level: 1,
            verbosity_details_level: 0,
            validation_log_level: 0,
            listening_port: 53,
            caching: true,
            ipv6: false,
            blocklist: Blocklist::default(),
        }
    }
}

/// A DNS over TLS provider.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Provider {
    pub name: String,
    /// Name presented in the provider's TLS certificate.
    pub tls_name: String,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
}

impl Provider {
    /// The address used for plaintext DNS when this provider is the
    /// preferred one.
    pub fn plaintext_address(&self) -> Option<IpAddr> {
        self.ipv4.first().copied().map(IpAddr::V4)
    }
}

/// Describes which blocklists should be fetched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlocklistBuildSettings {
    pub block_malicious: bool,
    pub block_ads: bool,
    pub block_surveillance: bool,
    /// Hostnames which are never blocked, even if a source lists them.
    pub allowed_hosts: Vec<String>,
    pub added_hosts: Vec<String>,
    pub added_ips: Vec<IpAddr>,
    pub added_ip_prefixes: Vec<IpPrefix>,
}

/// Hostnames and addresses the resolver should block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Blocklist {
    pub hostnames: Vec<String>,
    pub ips: Vec<IpAddr>,
    pub ip_prefixes: Vec<IpPrefix>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PrefixError {
    #[error("missing '/' in IP prefix {0:?}")]
    MissingLength(String),

    #[error("invalid address in IP prefix {0:?}")]
    Address(String),

    #[error("invalid prefix length in IP prefix {0:?}")]
    Length(String),
}

/// An address range, written as `address/length`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct IpPrefix {
    addr: IpAddr,
    len: u8,
}

impl IpPrefix {
    pub fn new(addr: IpAddr, len: u8) -> Option<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        (len <= max).then_some(Self { addr, len })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.len
    }
}

impl FromStr for IpPrefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((addr, len)) = s.split_once('/') else {
            return Err(PrefixError::MissingLength(s.to_string()));
        };
        let addr = addr
            .parse::<IpAddr>()
            .map_err(|_| PrefixError::Address(s.to_string()))?;
        let len = len
            .parse::<u8>()
            .map_err(|_| PrefixError::Length(s.to_string()))?;
        Self::new(addr, len).ok_or_else(|| PrefixError::Length(s.to_string()))
    }
}

impl std::fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = PrefixError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> Self {
        prefix.to_string()
    }
}
