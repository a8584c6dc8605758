//! The status and settings shared between the run loop, the restart
//! ticker, and callers.

use crate::settings::Settings;

use std::sync::Mutex;
use tracing::{event, Level};

/// The state of the encrypted DNS resolver, as seen from outside.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Status {
    /// No resolver session is wanted; plaintext DNS is in use.
    Stopped,

    /// A resolver session is live and answered its health probe.
    Running,

    /// The last attempt at (re)starting the resolver failed, or a refresh
    /// of its files failed. Retries continue in the background.
    Crashed,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Stopped => "stopped",
            Status::Running => "running",
            Status::Crashed => "crashed",
        };
        s.fmt(f)
    }
}

struct Inner {
    status: Status,
    settings: Settings,
    #[cfg(test)]
    history: Vec<Status>,
}

/// Lock-guarded status and settings.
///
/// Every access takes the lock, and the lock is never held across an
/// await point.
pub(crate) struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    pub(crate) fn new(settings: Settings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: Status::Stopped,
                settings,
                #[cfg(test)]
                history: vec![Status::Stopped],
            }),
        }
    }

    pub(crate) fn status(&self) -> Status {
        self.inner.lock().unwrap().status
    }

    pub(crate) fn set_status(&self, status: Status) {
        let mut inner = self.inner.lock().unwrap();
        if inner.status != status {
            event!(Level::DEBUG, from = %inner.status, to = %status, "status transition");
            #[cfg(test)]
            inner.history.push(status);
        }
        inner.status = status;
    }

    pub(crate) fn settings(&self) -> Settings {
        self.inner.lock().unwrap().settings.clone()
    }

    /// Replaces the settings, returning the previous ones.
    pub(crate) fn replace_settings(&self, settings: Settings) -> Settings {
        std::mem::replace(&mut self.inner.lock().unwrap().settings, settings)
    }

    /// Every distinct status stored so far, oldest first.
    #[cfg(test)]
    pub(crate) fn history(&self) -> Vec<Status> {
        self.inner.lock().unwrap().history.clone()
    }
}
