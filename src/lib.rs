//! dotvisor supervises a DNS-over-TLS resolver.
//!
//! It keeps an encrypted resolution path alive inside a long-running
//! network client, falls back on plaintext DNS whenever that path cannot be
//! established, and periodically refreshes the resolver's configuration.
//!
//! It uses the following terminology:
//! * The engine is the external resolver process performing DNS over TLS.
//! * A session is one run of that process, from start until it stops or
//!   crashes.
//! * Falling back means pointing DNS at a plaintext nameserver, either one
//!   set by the user or the first provider's address.
//!
//! # Usage
//!
//! * The main interface for this crate is [supervisor::Supervisor].
//! * To construct a supervisor, you must supply [supervisor::Dependencies]:
//!   an [engine::Engine] to run the resolver, a [nameserver::Nameserver] to
//!   point DNS at it, a [probe::Prober] to check it answers, and the
//!   [configurator::Configurator] and [blocklist::Builder] which produce
//!   its files.
//! * Drive [supervisor::Supervisor::run], and optionally
//!   [supervisor::Supervisor::run_restart_ticker], on the tokio runtime.
//!   Both return once their cancellation token is cancelled.
//! * Request changes through [supervisor::Supervisor::set_status] and
//!   [supervisor::Supervisor::set_settings].
//!
//! Default implementations exist for the engine ([engines::process]), the
//! nameserver ([nameservers::resolv_conf]), and the prober
//! ([probers::dns]).

// Public API
pub mod blocklist;
pub mod configurator;
pub mod engine;
pub mod files;
pub mod nameserver;
pub mod policy;
pub mod probe;
pub mod session;
pub mod settings;
pub mod state;
pub mod supervisor;

// Necessary for implementation
mod backoff;
mod fallback;
mod join;
mod report;
#[cfg(test)]
mod test_utils;
mod ticker;
mod timer;

// Default implementations of generic interfaces
pub mod engines;
pub mod nameservers;
pub mod probers;
