//! A single emulated boot session.
//!
//! The caller sees a blocking call. Inside, a private current-thread tokio
//! runtime multiplexes the console reader, the deadline, cancellation and
//! the QMP halt monitor. Whatever ends the session, the emulator process is
//! killed and reaped before `run` returns.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Notify};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::console::{ConsoleObserver, Flow, Transcript};
use super::profile::{BootFirmware, ConsoleMode, QemuCommand};
use super::qmp::{QmpClient, RunState};
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::process::{Cmd, CommandError};

/// Upper bound for one QMP round trip.
const QMP_IO_TIMEOUT: Duration = Duration::from_millis(500);

/// Time allowed for console output still in flight when a halt is seen.
const HALT_GRACE: Duration = Duration::from_millis(100);

const STDERR_TIMEOUT: Duration = Duration::from_secs(1);

/// Cancels a running session from another thread or task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        // Register before checking the flag so a concurrent cancel is not lost.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Wall-clock allowance from launch.
    pub timeout: Duration,
    /// Print console lines to stdout as they arrive.
    pub echo: bool,
    /// Treat Ctrl-C as cancellation.
    pub cancel_on_ctrl_c: bool,
    /// Interval between QMP `query-status` polls.
    pub qmp_poll: Duration,
}

impl SessionOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            echo: false,
            cancel_on_ctrl_c: false,
            qmp_poll: Duration::from_millis(250),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The observer returned [`Flow::Stop`].
    Stopped,
    /// QMP reported a terminal run state.
    Halted(RunState),
    /// The emulator exited on its own. `None` if killed by a signal.
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    pub transcript: Transcript,
    /// Emulator diagnostics, not part of the guest console.
    pub stderr: String,
    pub elapsed: Duration,
}

/// One boot of one medium.
pub struct EmulatedSession {
    command: QemuCommand,
}

impl EmulatedSession {
    pub fn new(config: &Config, image: &Path, firmware: BootFirmware) -> Self {
        Self {
            command: QemuCommand::new(config, image, firmware).console(ConsoleMode::Captured),
        }
    }

    pub fn command(&self) -> &QemuCommand {
        &self.command
    }

    /// Boot the medium and feed its console to `observer` until the session ends.
    pub fn run(
        &self,
        options: &SessionOptions,
        cancel: &CancelToken,
        observer: &mut dyn ConsoleObserver,
    ) -> PipelineResult<SessionOutcome> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PipelineError::Session {
                reason: format!("failed to start async runtime: {}", e),
            })?;
        runtime.block_on(self.drive(options, cancel, observer))
    }

    async fn drive(
        &self,
        options: &SessionOptions,
        cancel: &CancelToken,
        observer: &mut dyn ConsoleObserver,
    ) -> PipelineResult<SessionOutcome> {
        let started = Instant::now();

        let control_dir = tempfile::Builder::new()
            .prefix("siliso-qmp-")
            .tempdir()
            .map_err(|e| PipelineError::Session {
                reason: format!("failed to create QMP socket directory: {}", e),
            })?;
        let socket = control_dir.path().join("qmp.sock");
        let command = self.command.clone().qmp_socket(&socket);

        info!(
            "Booting {} ({}, {} cores, {})",
            command.image.display(),
            command.profile.memory,
            command.profile.smp,
            command.firmware.label()
        );
        debug!(args = ?command.args(), "qemu");

        let mut child = Command::new(&command.binary)
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&command.binary, e))?;

        let stdout = child.stdout.take().ok_or_else(|| PipelineError::Session {
            reason: "emulator stdout was not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| PipelineError::Session {
            reason: "emulator stderr was not captured".to_string(),
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let reader = tokio::spawn(async move {
            let mut stdout = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match stdout.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end_matches(['\r', '\n']).to_string();
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("console read failed: {}", e);
                        break;
                    }
                }
            }
        });
        let stderr_task = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let deadline = time::Instant::now() + options.timeout;
        let expiry = time::sleep_until(deadline);
        tokio::pin!(expiry);

        let interrupt = async {
            if options.cancel_on_ctrl_c && tokio::signal::ctrl_c().await.is_ok() {
                return;
            }
            std::future::pending::<()>().await
        };
        tokio::pin!(interrupt);

        let mut tick = time::interval(options.qmp_poll);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut monitor = HaltMonitor::new(socket);

        let mut lines = Vec::new();
        let mut deliver = |line: String, lines: &mut Vec<String>| {
            if options.echo {
                println!("{}", line);
            }
            let flow = observer.on_line(&line);
            lines.push(line);
            flow
        };

        let end = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break SessionEnd::Cancelled,

                _ = &mut interrupt => {
                    warn!("Interrupted");
                    break SessionEnd::Cancelled;
                }

                line = rx.recv() => match line {
                    Some(line) => {
                        if deliver(line, &mut lines) == Flow::Stop {
                            break SessionEnd::Stopped;
                        }
                    }
                    // Console closed: the emulator is exiting.
                    None => match time::timeout_at(deadline, child.wait()).await {
                        Ok(Ok(status)) => break SessionEnd::Exited(status.code()),
                        Ok(Err(e)) => {
                            return Err(PipelineError::Session {
                                reason: format!("failed to wait for emulator: {}", e),
                            })
                        }
                        Err(_) => break SessionEnd::TimedOut,
                    },
                },

                _ = &mut expiry => break SessionEnd::TimedOut,

                _ = tick.tick() => {
                    if let Some(state) = monitor.poll().await {
                        if state.is_halted() {
                            break SessionEnd::Halted(state);
                        }
                    }
                }
            }
        };

        if let SessionEnd::Halted(state) = end {
            debug!(?state, "guest halted");
            time::sleep(HALT_GRACE).await;
            while let Ok(line) = rx.try_recv() {
                if deliver(line, &mut lines) == Flow::Stop {
                    break;
                }
            }
        }

        // Teardown
        if let Err(e) = child.start_kill() {
            debug!("kill: {}", e);
        }
        if let Err(e) = child.wait().await {
            debug!("reap: {}", e);
        }
        reader.abort();
        let stderr = match time::timeout(STDERR_TIMEOUT, stderr_task).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        };

        let elapsed = started.elapsed();
        debug!(?end, lines = lines.len(), ?elapsed, "session ended");

        Ok(SessionOutcome {
            end,
            transcript: Transcript::new(lines),
            stderr,
            elapsed,
        })
    }
}

/// Lazily connected QMP client. Any failure just means "unknown this tick".
struct HaltMonitor {
    socket: PathBuf,
    client: Option<QmpClient>,
}

impl HaltMonitor {
    fn new(socket: PathBuf) -> Self {
        Self { socket, client: None }
    }

    async fn poll(&mut self) -> Option<RunState> {
        if self.client.is_none() {
            if !self.socket.exists() {
                return None;
            }
            match time::timeout(QMP_IO_TIMEOUT, QmpClient::connect(&self.socket)).await {
                Ok(Ok(client)) => self.client = Some(client),
                Ok(Err(e)) => {
                    debug!("QMP connect: {:#}", e);
                    return None;
                }
                Err(_) => return None,
            }
        }

        let client = self.client.as_mut()?;
        match time::timeout(QMP_IO_TIMEOUT, client.query_status()).await {
            Ok(Ok(state)) => Some(state),
            Ok(Err(e)) => {
                debug!("QMP query-status: {:#}", e);
                self.client = None;
                None
            }
            Err(_) => {
                self.client = None;
                None
            }
        }
    }
}

fn spawn_error(binary: &str, err: std::io::Error) -> PipelineError {
    let reason = if err.kind() == std::io::ErrorKind::NotFound {
        "not found in PATH".to_string()
    } else {
        format!("failed to start: {}", err)
    };
    PipelineError::Environment {
        tool: binary.to_string(),
        reason,
    }
}

/// Boot the medium attached to the terminal, with no deadline.
///
/// The serial console is multiplexed with the monitor: Ctrl+A X quits.
pub fn run_interactive(
    config: &Config,
    image: &Path,
    firmware: BootFirmware,
) -> PipelineResult<ExitStatus> {
    let command = QemuCommand::new(config, image, firmware).console(ConsoleMode::Interactive);
    info!("Starting QEMU ({}). Ctrl+A X to quit.", command.firmware.label());

    Cmd::new(&command.binary)
        .args(command.args())
        .allow_fail()
        .run_interactive()
        .map_err(|e| match e {
            CommandError::NotFound { program } => PipelineError::Environment {
                tool: program,
                reason: "not found in PATH".to_string(),
            },
            other => PipelineError::Environment {
                tool: command.binary.clone(),
                reason: other.to_string(),
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }

    #[test]
    fn test_spawn_error_not_found() {
        let err = spawn_error(
            "qemu-system-x86_64",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(
            err,
            PipelineError::Environment { ref reason, .. } if reason == "not found in PATH"
        ));
    }
}
