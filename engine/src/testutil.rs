/// Scripted process fakes for exercising the session machinery and the
/// merge pipeline without real child processes.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use muse_shared::errors::{EngineError, SpawnError};

use crate::process::{HandleStatus, LaunchSpec, ManagedProcess, ProcessExit, ProcessLauncher};

/// How the next fake process should behave. When no script is queued,
/// the process runs until terminated.
pub enum FakeScript {
    /// Exit immediately with the given code and stderr tail.
    Exit { code: i32, stderr: String },
    /// Refuse to spawn.
    FailSpawn,
    /// Emit stdout lines, then run until terminated.
    EmitLines(Vec<String>),
    /// Run until terminated.
    RunUntilTerminated,
}

/// Launcher double with spawn counting and per-launch scripts.
pub struct FakeLauncher {
    scripts: Mutex<VecDeque<FakeScript>>,
    launches: Mutex<Vec<LaunchSpec>>,
    spawn_count: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            launches: Mutex::new(Vec::new()),
            spawn_count: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn push(&self, script: FakeScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }

    /// Fake processes not yet dropped; zero once every handle has been
    /// released.
    pub fn live_processes(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ManagedProcess>, SpawnError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FakeScript::RunUntilTerminated);

        if let FakeScript::FailSpawn = script {
            return Err(SpawnError::NotFound(spec.program.clone()));
        }

        self.spawn_count.fetch_add(1, Ordering::SeqCst);
        self.launches.lock().unwrap().push(spec.clone());
        self.live.fetch_add(1, Ordering::SeqCst);

        let (ready_exit, stdout) = match script {
            FakeScript::Exit { code, stderr } => (
                Some(ProcessExit {
                    code: Some(code),
                    stderr_tail: stderr,
                    lost: None,
                }),
                None,
            ),
            FakeScript::EmitLines(lines) => {
                let (tx, rx) = mpsc::channel(64);
                tokio::spawn(async move {
                    for line in lines {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    // Dropping the sender ends the stream, same as a
                    // process going quiet on stdout.
                });
                (None, Some(rx))
            }
            _ => (None, None),
        };

        Ok(Box::new(FakeProcess {
            status: HandleStatus::Alive,
            ready_exit,
            stdout,
            killed: CancellationToken::new(),
            live: self.live.clone(),
        }))
    }
}

pub struct FakeProcess {
    status: HandleStatus,
    ready_exit: Option<ProcessExit>,
    stdout: Option<mpsc::Receiver<String>>,
    killed: CancellationToken,
    live: Arc<AtomicUsize>,
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ManagedProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn status(&self) -> HandleStatus {
        self.status
    }

    fn take_stdout_lines(&mut self) -> Option<mpsc::Receiver<String>> {
        self.stdout.take()
    }

    async fn suspend(&mut self) -> Result<(), EngineError> {
        if !matches!(self.status, HandleStatus::Exited(_)) {
            self.status = HandleStatus::Suspended;
        }
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), EngineError> {
        if !matches!(self.status, HandleStatus::Exited(_)) {
            self.status = HandleStatus::Alive;
        }
        Ok(())
    }

    async fn terminate(&mut self, _force: bool) -> Result<(), EngineError> {
        self.killed.cancel();
        Ok(())
    }

    async fn wait(&mut self) -> ProcessExit {
        if let Some(exit) = self.ready_exit.clone() {
            self.status = HandleStatus::Exited(exit.code);
            return exit;
        }
        self.killed.cancelled().await;
        self.status = HandleStatus::Exited(None);
        ProcessExit {
            code: None,
            stderr_tail: String::new(),
            lost: None,
        }
    }
}
