//! Implementation of [Engine] which runs the resolver as a child process.

use crate::engine::{Engine, Error, Process};

use anyhow::anyhow;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

/// The resolver binary run by [ProcessEngine::default].
pub const DEFAULT_PROGRAM: &str = "unbound";

// Lines buffered per stream before the process blocks on its output.
const LINE_BUFFER: usize = 64;

/// Runs a resolver binary in the foreground.
///
/// The binary is passed any extra arguments first, then `-d`, then one
/// `-v` per verbosity level.
#[derive(Clone, Debug)]
pub struct ProcessEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
        }
    }

    /// Adds arguments passed before the foreground and verbosity flags,
    /// such as the path of a configuration file.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command_args(&self, verbosity: u8) -> Vec<String> {
        self.args
            .iter()
            .cloned()
            .chain(std::iter::once("-d".to_string()))
            .chain(std::iter::repeat("-v".to_string()).take(usize::from(verbosity)))
            .collect()
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                event!(Level::WARN, ?err, "cannot read resolver output");
                return;
            }
        }
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    #[instrument(skip(self, token), fields(program = %self.program.display()))]
    async fn start(&self, token: CancellationToken, verbosity: u8) -> Result<Process, Error> {
        let mut child = Command::new(&self.program)
            .args(self.command_args(verbosity))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Other(anyhow!("resolver stdout is not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Other(anyhow!("resolver stderr is not piped")))?;

        let (stdout_tx, stdout_rx) = mpsc::channel(LINE_BUFFER);
        let (stderr_tx, stderr_rx) = mpsc::channel(LINE_BUFFER);
        tokio::task::spawn(forward_lines(stdout, stdout_tx));
        tokio::task::spawn(forward_lines(stderr, stderr_tx));

        let (exited_tx, exited_rx) = oneshot::channel();
        tokio::task::spawn(async move {
            let result = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => Err(Error::Exited(status)),
                    Err(err) => Err(Error::Io(err)),
                },
                _ = token.cancelled() => child.kill().await.map_err(Error::Io),
            };
            event!(Level::DEBUG, ?result, "resolver process exited");
            let _ = exited_tx.send(result);
        });

        Ok(Process {
            stdout: stdout_rx,
            stderr: stderr_rx,
            exited: exited_rx,
        })
    }
}
