/// Process control for the external downloader and ffmpeg executables.
///
/// Spawns children with piped stdio and no shell interpretation, captures
/// a bounded stderr tail for diagnostics, exposes stdout as a line
/// channel, and supports suspend/resume plus graceful termination with
/// SIGKILL escalation.
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use muse_shared::errors::{EngineError, SpawnError};

/// Status of a managed process handle. Moves strictly forward except
/// `Alive <-> Suspended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Spawning,
    Alive,
    Suspended,
    Exited(Option<i32>),
}

/// Exit report returned by `wait`: the code (`None` when the process
/// died to a signal) and the captured stderr tail.
#[derive(Debug, Clone)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub stderr_tail: String,
    /// Set when the process vanished rather than exiting (wait failure).
    pub lost: Option<String>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0) && self.lost.is_none()
    }
}

/// What to launch: program plus verbatim argument vector. Arguments are
/// never routed through a shell, so URLs and paths carrying shell
/// metacharacters cannot inject.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// One live external process, owned by exactly one session or merge
/// operation.
#[async_trait]
pub trait ManagedProcess: Send {
    fn pid(&self) -> Option<u32>;

    fn status(&self) -> HandleStatus;

    /// Take the stdout line channel. Yields once; later calls return
    /// `None`.
    fn take_stdout_lines(&mut self) -> Option<mpsc::Receiver<String>>;

    /// Stop scheduling the process (SIGSTOP). Idempotent.
    async fn suspend(&mut self) -> Result<(), EngineError>;

    /// Continue a suspended process (SIGCONT). Idempotent.
    async fn resume(&mut self) -> Result<(), EngineError>;

    /// Request termination. `force = false` sends a graceful signal
    /// (continuing a suspended process first, since a stopped process
    /// cannot act on SIGTERM); `force = true` kills outright. No-op on
    /// an exited handle.
    async fn terminate(&mut self, force: bool) -> Result<(), EngineError>;

    /// Wait for exit and reap the process. Callable again after a
    /// cancelled wait.
    async fn wait(&mut self) -> ProcessExit;
}

/// Spawner seam: the session machinery and merge pipeline only ever see
/// this trait, so tests can substitute a fake.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, SpawnError>;
}

/// Bounded ring of trailing stderr lines, shared with the reader task.
#[derive(Clone)]
pub struct StderrTail {
    inner: Arc<Mutex<VecDeque<String>>>,
    cap: usize,
}

impl StderrTail {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(cap))),
            cap: cap.max(1),
        }
    }

    pub fn push(&self, line: String) {
        let mut buf = self.inner.lock().expect("stderr tail poisoned");
        if buf.len() == self.cap {
            buf.pop_front();
        }
        buf.push_back(line);
    }

    pub fn snapshot(&self) -> String {
        let buf = self.inner.lock().expect("stderr tail poisoned");
        buf.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Checks the executable precondition before spawning. Bare program
/// names (no path separator) are left to the OS PATH lookup.
pub fn validate_executable(path: &Path) -> Result<(), SpawnError> {
    if path.components().count() < 2 {
        return Ok(());
    }
    let meta = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        _ => return Err(SpawnError::NotFound(path.to_path_buf())),
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(SpawnError::NotExecutable(path.to_path_buf()));
        }
    }
    #[cfg(not(unix))]
    let _ = meta;
    Ok(())
}

/// Real OS spawner. One controller instance per logical operation.
pub struct ProcessController {
    stderr_tail_lines: usize,
}

impl ProcessController {
    pub fn new(stderr_tail_lines: usize) -> Self {
        Self { stderr_tail_lines }
    }
}

#[async_trait]
impl ProcessLauncher for ProcessController {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, SpawnError> {
        validate_executable(&spec.program)?;

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpawnError::Os {
                program: spec.program.display().to_string(),
                source: e,
            })?;

        let pid = child.id();
        debug!("Spawned {:?} (pid: {:?})", spec.program, pid);

        // Stderr reader task: keeps the trailing lines for diagnostics.
        let tail = StderrTail::new(self.stderr_tail_lines);
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tail.push(line);
                }
            })
        });

        // Stdout reader task: forwards lines to whoever takes the channel.
        let (line_tx, line_rx) = mpsc::channel(64);
        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line_tx.send(line).await.is_err() {
                        break;
                    }
                }
            })
        });

        Ok(Box::new(OsProcess {
            child,
            pid,
            status: HandleStatus::Alive,
            stdout_lines: Some(line_rx),
            tail,
            stderr_task,
            _stdout_task: stdout_task,
        }))
    }
}

struct OsProcess {
    child: Child,
    pid: Option<u32>,
    status: HandleStatus,
    stdout_lines: Option<mpsc::Receiver<String>>,
    tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
    _stdout_task: Option<JoinHandle<()>>,
}

#[cfg(unix)]
impl OsProcess {
    /// Send a signal by pid, treating an already-gone process (ESRCH) as
    /// success.
    fn signal(&self, sig: Signal) -> Result<(), EngineError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        match signal::kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(EngineError::ProcessLost(format!(
                "signal {} to pid {} failed: {}",
                sig, pid, e
            ))),
        }
    }
}

#[async_trait]
impl ManagedProcess for OsProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn status(&self) -> HandleStatus {
        self.status
    }

    fn take_stdout_lines(&mut self) -> Option<mpsc::Receiver<String>> {
        self.stdout_lines.take()
    }

    #[cfg(unix)]
    async fn suspend(&mut self) -> Result<(), EngineError> {
        match self.status {
            HandleStatus::Suspended | HandleStatus::Exited(_) => Ok(()),
            _ => {
                self.signal(Signal::SIGSTOP)?;
                self.status = HandleStatus::Suspended;
                Ok(())
            }
        }
    }

    #[cfg(not(unix))]
    async fn suspend(&mut self) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("process suspension"))
    }

    #[cfg(unix)]
    async fn resume(&mut self) -> Result<(), EngineError> {
        match self.status {
            HandleStatus::Alive | HandleStatus::Exited(_) => Ok(()),
            _ => {
                self.signal(Signal::SIGCONT)?;
                self.status = HandleStatus::Alive;
                Ok(())
            }
        }
    }

    #[cfg(not(unix))]
    async fn resume(&mut self) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("process continuation"))
    }

    async fn terminate(&mut self, force: bool) -> Result<(), EngineError> {
        if matches!(self.status, HandleStatus::Exited(_)) {
            return Ok(());
        }
        if force {
            // SIGKILL without reaping; `wait` reaps.
            match self.child.start_kill() {
                Ok(()) => Ok(()),
                // Already exited between the status check and the kill.
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err(EngineError::Io(e)),
            }
        } else {
            #[cfg(unix)]
            {
                if self.status == HandleStatus::Suspended {
                    self.signal(Signal::SIGCONT)?;
                    self.status = HandleStatus::Alive;
                }
                self.signal(Signal::SIGTERM)
            }
            #[cfg(not(unix))]
            {
                // No graceful signal available; terminate outright.
                match self.child.start_kill() {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
                    Err(e) => Err(EngineError::Io(e)),
                }
            }
        }
    }

    async fn wait(&mut self) -> ProcessExit {
        let result = self.child.wait().await;
        // Drain the stderr reader so the tail is complete before reporting.
        if let Some(task) = self.stderr_task.as_mut() {
            let _ = task.await;
            self.stderr_task = None;
        }
        match result {
            Ok(status) => {
                let code = status.code();
                self.status = HandleStatus::Exited(code);
                ProcessExit {
                    code,
                    stderr_tail: self.tail.snapshot(),
                    lost: None,
                }
            }
            Err(e) => {
                warn!("Wait failed for pid {:?}: {}", self.pid, e);
                self.status = HandleStatus::Exited(None);
                ProcessExit {
                    code: None,
                    stderr_tail: self.tail.snapshot(),
                    lost: Some(e.to_string()),
                }
            }
        }
    }
}

/// Graceful shutdown with bounded escalation: terminate, wait up to
/// `grace`, then kill and reap. Never hangs on a misbehaving process.
pub async fn shutdown_process(proc: &mut Box<dyn ManagedProcess>, grace: Duration) -> ProcessExit {
    let _ = proc.terminate(false).await;
    let waited = tokio::time::timeout(grace, proc.wait()).await;
    if let Ok(exit) = waited {
        return exit;
    }
    warn!(
        "Process {:?} ignored graceful termination, killing",
        proc.pid()
    );
    let _ = proc.terminate(true).await;
    proc.wait().await
}
