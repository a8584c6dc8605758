//! Brings the encrypted resolver online, one attempt at a time.

use crate::backoff::Backoff;
use crate::engine::{self, Process};
use crate::files;
use crate::probe;
use crate::report::ErrorChain;
use crate::state::Status;
use crate::supervisor::Shared;

use std::sync::atomic::Ordering;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

/// Why a resolver session could not be established, or ended.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("cannot update files")]
    FilesRefresh(#[source] files::Error),

    #[error("cannot start resolver")]
    Start(#[source] engine::Error),

    #[error("resolver is not answering DNS queries")]
    Probe(#[source] probe::Error),

    #[error("resolver exited unexpectedly")]
    UnexpectedExit(#[source] Option<engine::Error>),
}

impl SetupError {
    /// Whether DNS should be pointed at plaintext nameservers because of
    /// this error.
    ///
    /// A failed files refresh leaves any resolver which is already running
    /// untouched, so there is nothing to fall back from.
    pub fn should_fall_back(&self) -> bool {
        !matches!(self, SetupError::FilesRefresh(_))
    }
}

/// The result of one attempt at bringing the resolver online.
#[derive(Debug)]
pub(crate) enum Setup {
    Ready(Session),
    Retry(SetupError),
}

/// The reply owed to a caller which explicitly asked for the resolver to
/// start, and is waiting to learn whether it did.
///
/// At most one status is ever sent; later outcomes are reported through
/// the status store alone.
#[derive(Debug, Default)]
pub(crate) struct PendingStart(Option<oneshot::Sender<Status>>);

impl PendingStart {
    pub(crate) fn new(tx: oneshot::Sender<Status>) -> Self {
        Self(Some(tx))
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.0.is_some()
    }

    pub(crate) fn reply(&mut self, status: Status) {
        if let Some(tx) = self.0.take() {
            // The caller may have given up waiting, which is fine.
            let _ = tx.send(status);
        }
    }
}

// Logs resolver output until both streams end, or until told to close.
//
// Closing stops the streams from accepting new lines, but every line
// already buffered is still logged before the collector exits.
struct LogCollector {
    close_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LogCollector {
    fn spawn(mut stdout: mpsc::Receiver<String>, mut stderr: mpsc::Receiver<String>) -> Self {
        let (close_tx, mut close_rx) = oneshot::channel();
        let handle = tokio::task::spawn(async move {
            let mut stdout_open = true;
            let mut stderr_open = true;
            let mut closing = false;
            while stdout_open || stderr_open {
                tokio::select! {
                    line = stdout.recv(), if stdout_open => match line {
                        Some(line) => event!(Level::INFO, stream = "stdout", "{line}"),
                        None => stdout_open = false,
                    },
                    line = stderr.recv(), if stderr_open => match line {
                        Some(line) => event!(Level::WARN, stream = "stderr", "{line}"),
                        None => stderr_open = false,
                    },
                    _ = &mut close_rx, if !closing => {
                        closing = true;
                        stdout.close();
                        stderr.close();
                    },
                }
            }
        });
        Self {
            close_tx: Some(close_tx),
            handle: Some(handle),
        }
    }

    async fn close(mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            crate::join::join(handle).await;
        }
    }
}

impl Drop for LogCollector {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Handles to one run of the resolver process.
///
/// Dropping a session stops its process.
#[derive(Debug)]
pub(crate) struct Session {
    token: CancellationToken,
    exited: Option<oneshot::Receiver<Result<(), engine::Error>>>,
    collector: Option<LogCollector>,
}

impl std::fmt::Debug for LogCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCollector").finish_non_exhaustive()
    }
}

impl Session {
    /// A session with no process behind it, used while encrypted DNS is
    /// disabled.
    ///
    /// It never exits on its own, and terminating it completes
    /// immediately.
    pub(crate) fn noop() -> Self {
        Self {
            token: CancellationToken::new(),
            exited: None,
            collector: None,
        }
    }

    fn new(token: CancellationToken, process: Process) -> Self {
        let Process {
            stdout,
            stderr,
            exited,
        } = process;
        Self {
            token,
            exited: Some(exited),
            collector: Some(LogCollector::spawn(stdout, stderr)),
        }
    }

    /// Completes if the process exits without being asked to.
    ///
    /// Never completes for a session without a live process. Cancel-safe.
    pub(crate) async fn unexpected_exit(&mut self) -> Option<engine::Error> {
        let Some(exited) = self.exited.as_mut() else {
            return futures::future::pending().await;
        };
        let result = exited.await;
        self.exited = None;
        match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(_) => Some(engine::Error::Other(anyhow::anyhow!(
                "resolver exit notification was dropped"
            ))),
        }
    }

    /// Stops the process and waits for it to exit.
    ///
    /// Safe to call more than once.
    pub(crate) async fn terminate(&mut self) {
        self.token.cancel();
        if let Some(exited) = self.exited.take() {
            let _ = exited.await;
        }
    }

    /// Stops the process and joins its log collection.
    pub(crate) async fn cleanup(mut self) {
        self.terminate().await;
        if let Some(collector) = self.collector.take() {
            collector.close().await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Makes one attempt at starting the resolver and confirming that it
/// answers queries.
///
/// If `pending` holds a waiting start request, it is answered as soon as
/// the outcome is known, except after a failed files refresh: that leaves
/// the request pending for the next attempt.
#[instrument(skip_all, name = "session::setup")]
pub(crate) async fn setup(
    shared: &Shared,
    token: &CancellationToken,
    backoff: &mut Backoff,
    pending: &mut PendingStart,
) -> Setup {
    shared.stats.setup_attempts.fetch_add(1, Ordering::Relaxed);

    if let Err(err) = shared.files.update(token, shared.store.settings()).await {
        shared.store.set_status(Status::Crashed);
        return Setup::Retry(SetupError::FilesRefresh(err));
    }

    let settings = shared.store.settings();

    // The process gets its own token, rather than a child of `token`: it
    // is only ever stopped through its session.
    let process_token = CancellationToken::new();
    let process = match shared
        .engine
        .start(
            process_token.clone(),
            settings.resolver.verbosity_details_level,
        )
        .await
    {
        Ok(process) => process,
        Err(err) => {
            process_token.cancel();
            shared.store.set_status(Status::Crashed);
            pending.reply(Status::Crashed);
            return Setup::Retry(SetupError::Start(err));
        }
    };
    let session = Session::new(process_token, process);

    let resolver = shared.policy.resolver_address;
    shared.nameserver.use_internally(resolver);
    if let Err(err) = shared
        .nameserver
        .use_system_wide(resolver, settings.keep_nameserver)
        .await
    {
        event!(Level::ERROR, err = %ErrorChain(&err), "cannot set system-wide DNS");
    }

    let probe = tokio::time::timeout(
        shared.policy.probe_timeout,
        shared.prober.wait_until_answering(token),
    )
    .await
    .unwrap_or(Err(probe::Error::TimedOut));
    if let Err(err) = probe {
        shared.store.set_status(Status::Crashed);
        pending.reply(Status::Crashed);
        session.cleanup().await;
        return Setup::Retry(SetupError::Probe(err));
    }

    event!(Level::INFO, "ready");
    backoff.reset();
    shared.store.set_status(Status::Running);
    pending.reply(Status::Running);
    shared.stats.sessions_started.fetch_add(1, Ordering::Relaxed);
    Setup::Ready(session)
}
