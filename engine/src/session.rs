/// Download session state machine.
///
/// One tokio task per session owns the session state and the process
/// handle and is the only writer to either. The task selects over, in
/// priority order, the cancellation token, the command queue, downloader
/// stdout lines, and process exit; waiting for exit therefore never
/// blocks command dispatch or other sessions.
///
/// Pause policy: OS-level suspension. A paused session keeps its handle
/// in `Suspended` status; resume continues the same process.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use muse_shared::errors::EngineError;
use muse_shared::models::{ExitInfo, Progress, SessionEvent, SessionSnapshot, SessionState};

use crate::process::{
    shutdown_process, LaunchSpec, ManagedProcess, ProcessExit, ProcessLauncher,
};
use crate::progress;

/// Session-directed operations, applied strictly in arrival order.
/// Cancel is deliberately absent: it travels through the cancellation
/// token so it wins races against queued commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOp {
    Start,
    Pause,
    Resume,
}

/// One queued command plus its acknowledgment channel.
pub struct SessionMsg {
    pub op: SessionOp,
    pub reply: oneshot::Sender<Result<SessionState, EngineError>>,
}

/// Build the downloader invocation for one session. `--continue` keeps
/// partially written output reusable across engine restarts.
pub fn download_spec(downloader_bin: &Path, url: &str, save_path: &Path) -> LaunchSpec {
    LaunchSpec::new(
        downloader_bin,
        vec![
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--continue".to_string(),
            "-o".to_string(),
            save_path.display().to_string(),
            url.to_string(),
        ],
    )
}

/// Cheap, cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionMsg>,
    cancel: CancellationToken,
    watch: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.watch.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.watch.borrow().state
    }

    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    /// Send an op and await the session's acknowledgment. A closed
    /// channel means the session already reached a terminal state, so
    /// the command degrades to an idempotent no-op carrying that state.
    pub async fn send_op(&self, op: SessionOp) -> Result<SessionState, EngineError> {
        let (tx, rx) = oneshot::channel();
        let msg = SessionMsg { op, reply: tx };
        if self.cmd_tx.send(msg).await.is_err() {
            return Ok(self.state());
        }
        match rx.await {
            Ok(result) => result,
            // Task ended before replying (canceled out from under the
            // command); report the final state.
            Err(_) => Ok(self.state()),
        }
    }

    /// Trigger cancellation and wait for the session to settle in a
    /// terminal state. Bounded: termination escalates to a kill after
    /// the configured grace period.
    pub async fn cancel_and_wait(&self) -> SessionState {
        self.cancel.cancel();
        let mut watch = self.watch.clone();
        let result = match watch.wait_for(|s| s.state.is_terminal()).await {
            Ok(snapshot) => snapshot.state,
            Err(_) => self.state(),
        };
        result
    }
}

/// The session task. Constructed via [`DownloadSession::spawn`], which
/// hands back the [`SessionHandle`] used by the router.
pub struct DownloadSession {
    id: String,
    save_path: PathBuf,
    spec: LaunchSpec,
    launcher: Arc<dyn ProcessLauncher>,
    cancel_grace: Duration,

    state: SessionState,
    progress: Option<Progress>,
    exit: Option<ExitInfo>,
    created_at: DateTime<Utc>,
    process: Option<Box<dyn ManagedProcess>>,
    stdout_lines: Option<mpsc::Receiver<String>>,

    cmd_rx: mpsc::Receiver<SessionMsg>,
    cancel: CancellationToken,
    watch_tx: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

enum Wake {
    Cancelled,
    Cmd(Option<SessionMsg>),
    Line(Option<String>),
    Exit(ProcessExit),
}

impl DownloadSession {
    pub fn spawn(
        id: String,
        save_path: PathBuf,
        spec: LaunchSpec,
        launcher: Arc<dyn ProcessLauncher>,
        cancel_grace: Duration,
        events: broadcast::Sender<SessionEvent>,
    ) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let snapshot = SessionSnapshot::new(id.clone(), save_path.clone());
        let created_at = snapshot.created_at;
        let (watch_tx, watch_rx) = watch::channel(snapshot);
        let cancel = CancellationToken::new();

        let session = DownloadSession {
            id,
            save_path,
            spec,
            launcher,
            cancel_grace,
            state: SessionState::Queued,
            progress: None,
            exit: None,
            created_at,
            process: None,
            stdout_lines: None,
            cmd_rx,
            cancel: cancel.clone(),
            watch_tx,
            events,
        };
        tokio::spawn(session.run());

        SessionHandle {
            cmd_tx,
            cancel,
            watch: watch_rx,
        }
    }

    async fn run(mut self) {
        loop {
            let has_stdout = self.stdout_lines.is_some();
            let has_process = self.process.is_some();
            let wake = {
                let cancel = self.cancel.clone();
                let DownloadSession {
                    cmd_rx,
                    stdout_lines,
                    process,
                    ..
                } = &mut self;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Wake::Cancelled,
                    msg = cmd_rx.recv() => Wake::Cmd(msg),
                    line = async { stdout_lines.as_mut().expect("guarded").recv().await },
                        if has_stdout => Wake::Line(line),
                    exit = async { process.as_mut().expect("guarded").wait().await },
                        if has_process => Wake::Exit(exit),
                }
            };

            match wake {
                Wake::Cancelled => {
                    self.finish_canceled().await;
                    break;
                }
                // Engine dropped: nothing can command this session any
                // more, so fold it up like a cancel.
                Wake::Cmd(None) => {
                    self.finish_canceled().await;
                    break;
                }
                Wake::Cmd(Some(msg)) => {
                    let result = self.apply(msg.op).await;
                    let _ = msg.reply.send(result);
                    if self.state.is_terminal() {
                        break;
                    }
                }
                Wake::Line(Some(line)) => {
                    if let Some(p) = progress::parse_line(&line) {
                        self.progress = Some(p);
                        self.publish();
                    }
                }
                Wake::Line(None) => {
                    // Stdout EOF; the exit arm reports the outcome.
                    self.stdout_lines = None;
                }
                Wake::Exit(exit) => {
                    self.finish_with_exit(exit);
                    break;
                }
            }
        }
        debug!("Session {} task ended in state {}", self.id, self.state);
    }

    async fn apply(&mut self, op: SessionOp) -> Result<SessionState, EngineError> {
        match (op, self.state) {
            (SessionOp::Start, SessionState::Queued) => self.start().await,
            (SessionOp::Pause, SessionState::Running) => self.pause().await,
            (SessionOp::Resume, SessionState::Paused) => self.resume().await,
            // Everything else is an idempotent no-op acknowledging the
            // current state.
            _ => Ok(self.state),
        }
    }

    async fn start(&mut self) -> Result<SessionState, EngineError> {
        let launched = self.launcher.launch(&self.spec).await;
        match launched {
            Ok(mut process) => {
                info!(
                    "Session {} running (pid: {:?}) -> {:?}",
                    self.id,
                    process.pid(),
                    self.save_path
                );
                self.stdout_lines = process.take_stdout_lines();
                self.process = Some(process);
                self.set_state(SessionState::Running, None);
                Ok(self.state)
            }
            Err(e) => {
                // Terminal for this session; also reported synchronously
                // to the start caller. Never retried here.
                let detail = e.to_string();
                self.exit = Some(ExitInfo {
                    code: None,
                    error: Some(detail.clone()),
                });
                self.set_state(SessionState::Failed, Some(detail));
                Err(EngineError::Spawn(e))
            }
        }
    }

    async fn pause(&mut self) -> Result<SessionState, EngineError> {
        if let Some(process) = self.process.as_mut() {
            process.suspend().await?;
            self.set_state(SessionState::Paused, None);
        }
        Ok(self.state)
    }

    async fn resume(&mut self) -> Result<SessionState, EngineError> {
        if let Some(process) = self.process.as_mut() {
            process.resume().await?;
            self.set_state(SessionState::Running, None);
        }
        Ok(self.state)
    }

    /// Cancel path: stop the process (graceful, bounded, escalating),
    /// drop partial output, settle in `Canceled`. Only reachable from
    /// non-terminal states, so a finished artifact is never deleted
    /// here even if a stale cancel arrives late.
    async fn finish_canceled(&mut self) {
        if let Some(mut process) = self.process.take() {
            let exit = shutdown_process(&mut process, self.cancel_grace).await;
            debug!(
                "Session {} canceled, process exit code {:?}",
                self.id, exit.code
            );
        }
        self.stdout_lines = None;
        self.remove_partial_output();
        self.exit = Some(ExitInfo {
            code: None,
            error: Some("canceled".to_string()),
        });
        self.set_state(SessionState::Canceled, None);
    }

    /// Classify a process exit into `Completed` or `Failed`.
    fn finish_with_exit(&mut self, exit: ProcessExit) {
        self.process = None;
        self.stdout_lines = None;
        if let Some(reason) = exit.lost {
            let detail = format!("process lost: {}", reason);
            self.exit = Some(ExitInfo {
                code: None,
                error: Some(detail.clone()),
            });
            self.set_state(SessionState::Failed, Some(detail));
        } else if exit.code == Some(0) {
            self.exit = Some(ExitInfo::clean());
            self.set_state(SessionState::Completed, None);
            info!("Session {} completed -> {:?}", self.id, self.save_path);
        } else if let Some(code) = exit.code {
            let detail = if exit.stderr_tail.is_empty() {
                format!("downloader exited with code {}", code)
            } else {
                exit.stderr_tail
            };
            self.exit = Some(ExitInfo {
                code: Some(code),
                error: Some(detail.clone()),
            });
            self.set_state(SessionState::Failed, Some(detail));
        } else {
            // Killed by a signal this engine did not send.
            let detail = "process lost: terminated by signal".to_string();
            self.exit = Some(ExitInfo {
                code: None,
                error: Some(detail.clone()),
            });
            self.set_state(SessionState::Failed, Some(detail));
        }
    }

    fn remove_partial_output(&self) {
        let part = PathBuf::from(format!("{}.part", self.save_path.display()));
        for path in [&self.save_path, &part] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed partial output {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove partial output {:?}: {}", path, e),
            }
        }
    }

    fn set_state(&mut self, state: SessionState, detail: Option<String>) {
        self.state = state;
        self.publish();
        let _ = self.events.send(SessionEvent {
            id: self.id.clone(),
            state,
            detail,
        });
        info!("Session {} -> {}", self.id, state);
    }

    fn publish(&self) {
        let _ = self.watch_tx.send(SessionSnapshot {
            id: self.id.clone(),
            save_path: self.save_path.clone(),
            state: self.state,
            progress: self.progress.clone(),
            exit: self.exit.clone(),
            created_at: self.created_at,
        });
    }
}
