//! Utilities to help with testing the supervisor

use crate::blocklist::{self, BuildResult};
use crate::configurator::{self, Configurator};
use crate::engine::{self, Engine, Process};
use crate::nameserver::{self, Nameserver};
use crate::policy::Policy;
use crate::probe::{self, Prober};
use crate::settings::{BlocklistBuildSettings, IpPrefix, Provider, ResolverSettings, Settings};
use crate::supervisor::{Dependencies, Shared, Stats, Supervisor};

use anyhow::anyhow;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Settings with encrypted DNS enabled and a single provider.
pub fn enabled_settings() -> Settings {
    Settings {
        enabled: true,
        resolver: ResolverSettings {
            providers: vec![Provider {
                name: "cloudflare".to_string(),
                tls_name: "cloudflare-dns.com".to_string(),
                ipv4: vec![Ipv4Addr::new(1, 1, 1, 1)],
                ipv6: vec![],
            }],
            ..Default::default()
        },
        ..Default::default()
    }
}

/// The plaintext address [enabled_settings] falls back on.
pub const PLAINTEXT: IpAddr = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));

/// A test-only resolver engine, whose processes live until cancelled or
/// told to crash.
pub struct FakeEngine {
    fail_start: AtomicBool,
    starts: AtomicUsize,
    live: Arc<AtomicUsize>,
    open_streams: Arc<AtomicUsize>,
    crash_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            open_streams: Arc::new(AtomicUsize::new(0)),
            crash_tx: Mutex::new(None),
        }
    }

    /// Makes every subsequent start fail immediately.
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// The number of start attempts, successful or not.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// The number of processes which have not exited yet.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// The number of stdout and stderr streams whose reader has not closed
    /// them yet, across every process.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Makes the most recently started process exit with an error.
    pub fn crash(&self) {
        let crash_tx = self.crash_tx.lock().unwrap().take();
        if let Some(crash_tx) = crash_tx {
            let _ = crash_tx.send(());
        }
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn start(&self, token: CancellationToken, _verbosity: u8) -> Result<Process, engine::Error> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(engine::Error::Other(anyhow!("fake resolver refused to start")));
        }

        let (stdout_tx, stdout) = mpsc::channel(8);
        let (stderr_tx, stderr) = mpsc::channel(8);
        let (exited_tx, exited) = oneshot::channel();
        let (crash_tx, crash_rx) = oneshot::channel();
        *self.crash_tx.lock().unwrap() = Some(crash_tx);

        let live = self.live.clone();
        live.fetch_add(1, Ordering::SeqCst);
        let open_streams = self.open_streams.clone();
        open_streams.fetch_add(2, Ordering::SeqCst);
        tokio::task::spawn(async move {
            let _ = stdout_tx.send("fake resolver started".to_string()).await;
            let result = tokio::select! {
                _ = token.cancelled() => Ok(()),
                Ok(()) = crash_rx => {
                    let _ = stderr_tx.send("fake resolver crashed".to_string()).await;
                    Err(engine::Error::Other(anyhow!("fake resolver crashed")))
                }
            };
            live.fetch_sub(1, Ordering::SeqCst);
            let _ = exited_tx.send(result);

            // Unlike a real process, keep both streams open until the
            // reader closes them.
            for stream in [stdout_tx, stderr_tx] {
                stream.closed().await;
                open_streams.fetch_sub(1, Ordering::SeqCst);
            }
        });

        Ok(Process {
            stdout,
            stderr,
            exited,
        })
    }
}

/// A test-only prober, which either answers immediately or never answers.
pub struct FakeProber {
    answering: AtomicBool,
    probes: AtomicUsize,
}

impl FakeProber {
    pub fn new() -> Self {
        Self {
            answering: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_answering(&self, answering: bool) {
        self.answering.store(answering, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn wait_until_answering(&self, token: &CancellationToken) -> Result<(), probe::Error> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.answering.load(Ordering::SeqCst) {
            return Ok(());
        }
        token.cancelled().await;
        Err(probe::Error::Cancelled)
    }
}

/// A call made through [FakeNameserver].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameserverCall {
    Internal(IpAddr),
    SystemWide { ip: IpAddr, keep_existing: bool },
}

/// A test-only nameserver which records what it was asked to do.
pub struct FakeNameserver {
    calls: Mutex<Vec<NameserverCall>>,
    internal: Mutex<Option<IpAddr>>,
    fail_system_wide: AtomicBool,
}

impl FakeNameserver {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(vec![]),
            internal: Mutex::new(None),
            fail_system_wide: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<NameserverCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn internal(&self) -> Option<IpAddr> {
        *self.internal.lock().unwrap()
    }

    pub fn fail_system_wide(&self, fail: bool) {
        self.fail_system_wide.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Nameserver for FakeNameserver {
    fn use_internally(&self, ip: IpAddr) {
        self.calls.lock().unwrap().push(NameserverCall::Internal(ip));
        *self.internal.lock().unwrap() = Some(ip);
    }

    async fn use_system_wide(&self, ip: IpAddr, keep_existing: bool) -> Result<(), nameserver::Error> {
        self.calls
            .lock()
            .unwrap()
            .push(NameserverCall::SystemWide { ip, keep_existing });
        if self.fail_system_wide.load(Ordering::SeqCst) {
            return Err(nameserver::Error::Other(anyhow!("read-only file system")));
        }
        Ok(())
    }
}

/// A test-only configurator which keeps every configuration it was asked
/// to write.
pub struct FakeConfigurator {
    fail_setup_files: AtomicBool,
    fail_write_config: AtomicBool,
    written: Mutex<Vec<ResolverSettings>>,
}

impl FakeConfigurator {
    pub fn new() -> Self {
        Self {
            fail_setup_files: AtomicBool::new(false),
            fail_write_config: AtomicBool::new(false),
            written: Mutex::new(vec![]),
        }
    }

    pub fn fail_setup_files(&self, fail: bool) {
        self.fail_setup_files.store(fail, Ordering::SeqCst);
    }

    pub fn fail_write_config(&self, fail: bool) {
        self.fail_write_config.store(fail, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<ResolverSettings> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl Configurator for FakeConfigurator {
    async fn setup_files(&self, _token: &CancellationToken) -> Result<(), configurator::Error> {
        if self.fail_setup_files.load(Ordering::SeqCst) {
            return Err(configurator::Error::Other(anyhow!("cannot download root hints")));
        }
        Ok(())
    }

    async fn write_config(&self, settings: &ResolverSettings) -> Result<(), configurator::Error> {
        if self.fail_write_config.load(Ordering::SeqCst) {
            return Err(configurator::Error::Other(anyhow!("disk full")));
        }
        self.written.lock().unwrap().push(settings.clone());
        Ok(())
    }
}

/// One blocklist source served by [FakeBlocklists].
pub enum Source {
    Hosts { name: String, hosts: Vec<String> },
    Ips { name: String, ips: Vec<IpAddr> },
    Prefixes { name: String, prefixes: Vec<IpPrefix> },
    Failing { name: String },
}

impl Source {
    pub fn ok_hosts(name: &str, hosts: &[&str]) -> Self {
        Source::Hosts {
            name: name.to_string(),
            hosts: hosts.iter().map(|host| host.to_string()).collect(),
        }
    }

    pub fn ok_ips(name: &str, ips: &[IpAddr]) -> Self {
        Source::Ips {
            name: name.to_string(),
            ips: ips.to_vec(),
        }
    }

    pub fn ok_prefixes(name: &str, prefixes: &[&str]) -> Self {
        Source::Prefixes {
            name: name.to_string(),
            prefixes: prefixes
                .iter()
                .map(|prefix| prefix.parse().expect("invalid test prefix"))
                .collect(),
        }
    }

    pub fn failing(name: &str) -> Self {
        Source::Failing {
            name: name.to_string(),
        }
    }
}

/// A test-only blocklist builder over a fixed set of sources.
pub struct FakeBlocklists {
    sources: Vec<Source>,
    builds: AtomicUsize,
    last_error_count: AtomicUsize,
}

impl FakeBlocklists {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            builds: AtomicUsize::new(0),
            last_error_count: AtomicUsize::new(0),
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn last_error_count(&self) -> usize {
        self.last_error_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl blocklist::Builder for FakeBlocklists {
    async fn build_all(
        &self,
        _token: &CancellationToken,
        _settings: &BlocklistBuildSettings,
    ) -> BuildResult {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let mut result = BuildResult::default();
        for source in &self.sources {
            match source {
                Source::Hosts { hosts, .. } => result.hostnames.extend(hosts.iter().cloned()),
                Source::Ips { ips, .. } => result.ips.extend(ips.iter().copied()),
                Source::Prefixes { prefixes, .. } => {
                    result.ip_prefixes.extend(prefixes.iter().copied())
                }
                Source::Failing { name } => result.errors.push(blocklist::Error::Fetch {
                    source_name: name.clone(),
                    err: anyhow!("connection reset"),
                }),
            }
        }
        self.last_error_count
            .store(result.errors.len(), Ordering::SeqCst);
        result
    }
}

/// Every fake collaborator, wired together.
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub prober: Arc<FakeProber>,
    pub nameserver: Arc<FakeNameserver>,
    pub configurator: Arc<FakeConfigurator>,
    pub blocklists: Arc<FakeBlocklists>,
    pub policy: Policy,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(FakeEngine::new()),
            prober: Arc::new(FakeProber::new()),
            nameserver: Arc::new(FakeNameserver::new()),
            configurator: Arc::new(FakeConfigurator::new()),
            blocklists: Arc::new(FakeBlocklists::new(vec![Source::ok_hosts(
                "ads",
                &["ads.example.com"],
            )])),
            policy: Policy {
                backoff: Duration::from_secs(10),
                ..Default::default()
            },
        }
    }

    pub fn dependencies(&self) -> Dependencies {
        Dependencies {
            engine: self.engine.clone(),
            prober: self.prober.clone(),
            nameserver: self.nameserver.clone(),
            configurator: self.configurator.clone(),
            blocklists: self.blocklists.clone(),
        }
    }

    /// Collaborators for driving a single setup attempt directly.
    pub fn shared(&self) -> Shared {
        Shared::new(
            self.dependencies(),
            enabled_settings(),
            self.policy.clone(),
            Stats::default(),
        )
    }

    pub fn supervisor(&self, settings: Settings) -> Supervisor {
        Supervisor::new(self.dependencies(), settings, self.policy.clone())
    }
}

/// Routes tracing output through the test harness, once per process.
pub fn setup_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Counts the warnings logged while it is the default subscriber.
#[derive(Clone, Default)]
pub struct WarningCounter(Arc<AtomicUsize>);

impl WarningCounter {
    /// Installs the counter as this thread's subscriber until the guard is
    /// dropped.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        use tracing_subscriber::layer::SubscriberExt;
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarningCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}
