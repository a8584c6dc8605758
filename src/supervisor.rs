//! The supervisor keeps an encrypted DNS resolver alive, and falls back on
//! plaintext DNS whenever it cannot.

use crate::backoff::Backoff;
use crate::blocklist;
use crate::configurator;
use crate::engine;
use crate::fallback::Fallback;
use crate::files::Files;
use crate::nameserver;
use crate::policy::Policy;
use crate::probe;
use crate::report::ErrorChain;
use crate::session::{self, PendingStart, Session, Setup, SetupError};
use crate::settings::Settings;
use crate::state::{Status, Store};
use crate::ticker::Ticker;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("already running")]
    AlreadyRunning,

    #[error("status {0} cannot be requested")]
    InvalidStatus(Status),

    #[error("supervisor terminated")]
    Terminated,
}

/// The result of [Supervisor::set_status].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The resolver was already in (or recovering towards) this status.
    Already(Status),

    /// The run loop acted on the request, ending up in this status.
    ///
    /// A start request may still end in [Status::Crashed] or, when
    /// encrypted DNS is disabled, [Status::Stopped].
    Changed(Status),
}

/// The result of [Supervisor::set_settings].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SettingsOutcome {
    Unchanged,
    /// Only the refresh period changed, so the resolver kept running.
    UpdatePeriodChanged,
    /// The resolver was stopped, and restarted with the new settings.
    Restarted(StatusOutcome),
    /// The resolver was stopped, and stays stopped since encrypted DNS is
    /// now disabled.
    Disabled,
}

/// Supervisor-wide counters.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    /// Attempts at bringing the resolver online, successful or not.
    pub setup_attempts: Arc<AtomicUsize>,

    /// Sessions which answered their health probe.
    pub sessions_started: Arc<AtomicUsize>,

    /// Times a resolver failure pushed DNS back to plaintext.
    pub fallbacks: Arc<AtomicUsize>,

    /// Times plaintext DNS was selected without any failure, e.g. while
    /// stopping or before starting.
    pub plaintext_defaults: Arc<AtomicUsize>,

    /// Live sessions which exited without being asked to.
    pub unexpected_exits: Arc<AtomicUsize>,

    /// Periodic restarts performed by the restart ticker.
    pub restarts: Arc<AtomicUsize>,
}

/// The collaborators a supervisor drives.
#[derive(Clone)]
pub struct Dependencies {
    pub engine: engine::SharedEngine,
    pub prober: probe::SharedProber,
    pub nameserver: nameserver::SharedNameserver,
    pub configurator: configurator::SharedConfigurator,
    pub blocklists: blocklist::SharedBuilder,
}

// Everything the run loop and the restart ticker both reach for.
pub(crate) struct Shared {
    pub(crate) store: Store,
    pub(crate) files: Files,
    pub(crate) fallback: Fallback,
    pub(crate) engine: engine::SharedEngine,
    pub(crate) prober: probe::SharedProber,
    pub(crate) nameserver: nameserver::SharedNameserver,
    pub(crate) policy: Policy,
    pub(crate) stats: Stats,
}

impl Shared {
    pub(crate) fn new(
        dependencies: Dependencies,
        settings: Settings,
        policy: Policy,
        stats: Stats,
    ) -> Self {
        let Dependencies {
            engine,
            prober,
            nameserver,
            configurator,
            blocklists,
        } = dependencies;
        Self {
            store: Store::new(settings),
            files: Files {
                configurator,
                blocklists,
            },
            fallback: Fallback {
                nameserver: nameserver.clone(),
                stats: stats.clone(),
            },
            engine,
            prober,
            nameserver,
            policy,
            stats,
        }
    }

    async fn use_unencrypted_dns(&self, is_fallback: bool) {
        self.fallback
            .use_unencrypted_dns(&self.store.settings(), is_fallback)
            .await
    }
}

#[derive(Debug)]
enum Request {
    Start { tx: oneshot::Sender<Status> },
    Stop { tx: oneshot::Sender<()> },
}

// What the run loop does after serving a session.
enum Next {
    Exit,
    Restart(PendingStart),
}

struct RunLoop<'a> {
    shared: &'a Shared,
    token: CancellationToken,
    rx: mpsc::Receiver<Request>,
    backoff: Backoff,
}

impl RunLoop<'_> {
    async fn run(mut self) {
        self.shared.use_unencrypted_dns(false).await;

        let Some(mut pending) = self.idle().await else {
            return;
        };

        while !self.token.is_cancelled() {
            self.shared.use_unencrypted_dns(false).await;

            let Some(mut session) = self.establish(&mut pending).await else {
                return;
            };

            let next = self.serve(&mut session).await;
            session.cleanup().await;
            match next {
                Next::Exit => return,
                Next::Restart(next_pending) => pending = next_pending,
            }
        }
        pending.reply(Status::Stopped);
    }

    // Waits for the first start request.
    async fn idle(&mut self) -> Option<PendingStart> {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => return None,
                request = self.rx.recv() => match request? {
                    Request::Start { tx } => return Some(PendingStart::new(tx)),
                    // Nothing runs yet, so there is nothing to stop.
                    Request::Stop { tx } => {
                        let _ = tx.send(());
                    }
                },
            }
        }
    }

    // Retries setup until a session is up, or returns a no-op session if
    // encrypted DNS is disabled.
    //
    // Returns `None` on cancellation.
    async fn establish(&mut self, pending: &mut PendingStart) -> Option<Session> {
        while self.shared.store.settings().enabled {
            if self.token.is_cancelled() {
                pending.reply(Status::Stopped);
                return None;
            }
            match session::setup(self.shared, &self.token, &mut self.backoff, pending).await {
                Setup::Ready(session) => return Some(session),
                Setup::Retry(err) => {
                    if err.should_fall_back() {
                        self.shared.use_unencrypted_dns(true).await;
                    }
                    let err: &(dyn std::error::Error + Send + Sync + 'static) = &err;
                    self.backoff.wait(&self.token, Some(err)).await;
                }
            }
        }

        self.shared.use_unencrypted_dns(false).await;
        self.shared.store.set_status(Status::Stopped);
        pending.reply(Status::Stopped);
        Some(Session::noop())
    }

    // Serves requests while the session lives.
    async fn serve(&mut self, session: &mut Session) -> Next {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    session.terminate().await;
                    return Next::Exit;
                }
                request = self.rx.recv() => match request {
                    Some(Request::Stop { tx }) => {
                        event!(Level::INFO, "stopping");
                        self.shared.use_unencrypted_dns(false).await;
                        session.terminate().await;
                        self.shared.store.set_status(Status::Stopped);
                        let _ = tx.send(());
                    }
                    Some(Request::Start { tx }) => {
                        event!(Level::INFO, "starting");
                        return Next::Restart(PendingStart::new(tx));
                    }
                    None => {
                        session.terminate().await;
                        return Next::Exit;
                    }
                },
                err = session.unexpected_exit() => {
                    session.terminate().await;
                    if self.token.is_cancelled() {
                        return Next::Exit;
                    }
                    self.shared.stats.unexpected_exits.fetch_add(1, Ordering::Relaxed);
                    self.shared.store.set_status(Status::Crashed);
                    self.shared.use_unencrypted_dns(true).await;
                    let err = SetupError::UnexpectedExit(err);
                    let err: &(dyn std::error::Error + Send + Sync + 'static) = &err;
                    self.backoff.wait(&self.token, Some(err)).await;
                    return Next::Restart(PendingStart::default());
                }
            }
        }
    }
}

struct Inner {
    shared: Shared,
    tx: mpsc::Sender<Request>,
    rx: Mutex<Option<mpsc::Receiver<Request>>>,
    ticker_running: AtomicBool,

    // Serializes status changes requested from outside the run loop.
    loop_lock: tokio::sync::Mutex<()>,

    reschedule: Notify,
}

/// Supervises an encrypted DNS resolver.
///
/// A supervisor does nothing until both [Supervisor::run] and, if periodic
/// refreshes are wanted, [Supervisor::run_restart_ticker] are driven. Both
/// return once their cancellation token is cancelled.
///
/// Cloning a supervisor yields another handle to the same state.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(dependencies: Dependencies, settings: Settings, policy: Policy) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                shared: Shared::new(dependencies, settings, policy, Stats::default()),
                tx,
                rx: Mutex::new(Some(rx)),
                ticker_running: AtomicBool::new(false),
                loop_lock: tokio::sync::Mutex::new(()),
                reschedule: Notify::new(),
            }),
        }
    }

    /// Runs the state machine which starts, stops, and recovers the
    /// resolver.
    ///
    /// Until the first request to run, plaintext DNS is used. Returns
    /// [Error::AlreadyRunning] if called more than once.
    #[instrument(skip_all, name = "Supervisor::run")]
    pub async fn run(&self, token: CancellationToken) -> Result<(), Error> {
        let rx = self
            .inner
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::AlreadyRunning)?;
        let policy = &self.inner.shared.policy;
        RunLoop {
            shared: &self.inner.shared,
            token,
            rx,
            backoff: Backoff::new(policy.backoff, policy.backoff_spread),
        }
        .run()
        .await;
        event!(Level::DEBUG, "run loop exited");
        Ok(())
    }

    /// Periodically refreshes the resolver's files and restarts it, every
    /// [Settings::update_period].
    #[instrument(skip_all, name = "Supervisor::run_restart_ticker")]
    pub async fn run_restart_ticker(&self, token: CancellationToken) -> Result<(), Error> {
        if self.inner.ticker_running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let mut ticker = Ticker::new(self.get_settings().update_period);
        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    // The run loop reads no requests while backing off.
                    let restarted = tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        restarted = self.restart(&token) => restarted,
                    };
                    if restarted {
                        ticker.rearm(self.get_settings().update_period);
                    }
                }
                _ = self.inner.reschedule.notified() => {
                    ticker.reschedule(self.get_settings().update_period);
                }
            }
        }
    }

    // Returns false if the restart was skipped.
    async fn restart(&self, token: &CancellationToken) -> bool {
        let shared = &self.inner.shared;
        if shared.store.status() == Status::Running {
            if let Err(err) = shared.files.update(token, shared.store.settings()).await {
                shared.store.set_status(Status::Crashed);
                event!(Level::ERROR, err = %ErrorChain(&err), "periodic files update failed");
                event!(Level::WARN, "skipping resolver restart due to failed files update");
                return false;
            }
        }

        if let Err(err) = self.set_status(Status::Stopped).await {
            event!(Level::WARN, %err, "cannot stop resolver for restart");
        }
        match self.set_status(Status::Running).await {
            Ok(_) => {
                shared.stats.restarts.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                event!(Level::WARN, %err, "cannot start resolver after restart");
            }
        }
        true
    }

    pub fn get_status(&self) -> Status {
        self.inner.shared.store.status()
    }

    /// Requests a status change, and waits for the run loop to act on it.
    ///
    /// Requesting [Status::Running] returns the outcome of the first
    /// attempt at starting the resolver. A failed attempt keeps being
    /// retried in the background.
    #[instrument(skip(self), name = "Supervisor::set_status")]
    pub async fn set_status(&self, desired: Status) -> Result<StatusOutcome, Error> {
        let _guard = self.inner.loop_lock.lock().await;
        let current = self.get_status();
        match desired {
            Status::Running => {
                if current != Status::Stopped {
                    return Ok(StatusOutcome::Already(current));
                }
                let (tx, rx) = oneshot::channel();
                self.send(Request::Start { tx }).await?;
                let status = rx.await.map_err(|_| Error::Terminated)?;
                Ok(StatusOutcome::Changed(status))
            }
            Status::Stopped => {
                if current == Status::Stopped {
                    return Ok(StatusOutcome::Already(current));
                }
                let (tx, rx) = oneshot::channel();
                self.send(Request::Stop { tx }).await?;
                rx.await.map_err(|_| Error::Terminated)?;
                Ok(StatusOutcome::Changed(Status::Stopped))
            }
            Status::Crashed => Err(Error::InvalidStatus(desired)),
        }
    }

    async fn send(&self, request: Request) -> Result<(), Error> {
        self.inner
            .tx
            .send(request)
            .await
            .map_err(|_| Error::Terminated)
    }

    pub fn get_settings(&self) -> Settings {
        self.inner.shared.store.settings()
    }

    /// Replaces the settings, restarting the resolver if anything other
    /// than the refresh period changed.
    #[instrument(skip_all, name = "Supervisor::set_settings")]
    pub async fn set_settings(&self, settings: Settings) -> Result<SettingsOutcome, Error> {
        let previous = self.inner.shared.store.replace_settings(settings.clone());
        if previous == settings {
            return Ok(SettingsOutcome::Unchanged);
        }
        let period_changed = previous.update_period != settings.update_period;
        let only_period_changed = Settings {
            update_period: previous.update_period,
            ..settings.clone()
        } == previous;
        let enabled = settings.enabled;

        if period_changed {
            self.inner.reschedule.notify_one();
        }
        if only_period_changed {
            return Ok(SettingsOutcome::UpdatePeriodChanged);
        }

        self.set_status(Status::Stopped).await?;
        if !enabled {
            return Ok(SettingsOutcome::Disabled);
        }
        let outcome = self.set_status(Status::Running).await?;
        Ok(SettingsOutcome::Restarted(outcome))
    }

    pub fn stats(&self) -> &Stats {
        &self.inner.shared.stats
    }
}
