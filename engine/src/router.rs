/// Engine: the command interface consumed by the application shell.
///
/// A closed command enum routed through one match gives compile-time
/// exhaustiveness over the operations the shell can issue. Dispatch
/// never blocks on process exits; those are owned by per-session tasks.
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use muse_shared::errors::{EngineError, EngineResult};
use muse_shared::models::{MergeRequest, RegistryStats, SessionEvent, SessionSnapshot};
use muse_shared::protocol::{CommandReply, EngineCommand};

use crate::config::EngineConfig;
use crate::merge::MergePipeline;
use crate::process::{ProcessController, ProcessLauncher};
use crate::registry::SessionRegistry;
use crate::session::{download_spec, DownloadSession, SessionOp};

pub struct Engine {
    config: EngineConfig,
    registry: SessionRegistry,
    launcher: Arc<dyn ProcessLauncher>,
    merger: MergePipeline,
    events: broadcast::Sender<SessionEvent>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let launcher: Arc<dyn ProcessLauncher> =
            Arc::new(ProcessController::new(config.stderr_tail_lines));
        Self::with_launcher(config, launcher)
    }

    /// Construct with a custom launcher (the test seam).
    pub fn with_launcher(config: EngineConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let (events, _) = broadcast::channel(256);
        let merger = MergePipeline::new(config.ffmpeg_bin.clone(), launcher.clone());
        Self {
            config,
            registry: SessionRegistry::new(),
            launcher,
            merger,
            events,
        }
    }

    /// Subscribe to session state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Route one command. Errors are reported synchronously to the
    /// caller; terminal session errors are additionally recorded on the
    /// session itself.
    pub async fn dispatch(&self, cmd: EngineCommand) -> EngineResult<CommandReply> {
        match cmd {
            EngineCommand::StartDownload { url, save_path } => {
                self.start_download(&url, save_path).await
            }
            EngineCommand::PauseDownload { url } => self.pause_download(&url).await,
            EngineCommand::ResumeDownload { url } => self.resume_download(&url).await,
            EngineCommand::CancelDownload { url } => self.cancel_download(&url).await,
            EngineCommand::MergeFiles {
                video_path,
                audio_path,
                output_path,
                codec,
            } => {
                let req = MergeRequest {
                    video_path,
                    audio_path,
                    output_path,
                    codec,
                };
                let output_path = self.merger.merge(&req).await?;
                Ok(CommandReply::Merged { output_path })
            }
            EngineCommand::RunFfmpeg { args } => {
                let summary = self.merger.run_ffmpeg(&args).await?;
                Ok(CommandReply::FfmpegDone { summary })
            }
            EngineCommand::SessionStatus { url } => {
                let snapshot = self.session_status(&url).await?;
                Ok(CommandReply::Status { snapshot })
            }
            EngineCommand::ListSessions => Ok(CommandReply::Sessions {
                snapshots: self.registry.snapshots().await,
            }),
        }
    }

    /// Start (or idempotently re-acknowledge) a download for `url`.
    /// Relative save paths land under the configured download dir.
    pub async fn start_download(
        &self,
        url: &str,
        save_path: PathBuf,
    ) -> EngineResult<CommandReply> {
        let save_path = if save_path.is_absolute() {
            save_path
        } else {
            self.config.download_dir.join(save_path)
        };

        let spec = download_spec(&self.config.downloader_bin, url, &save_path);
        let launcher = self.launcher.clone();
        let cancel_grace = self.config.cancel_grace;
        let events = self.events.clone();
        let id = url.to_string();

        let (handle, created) = self
            .registry
            .get_or_create(url, move || {
                DownloadSession::spawn(id, save_path, spec, launcher, cancel_grace, events)
            })
            .await;

        if created {
            // Surfaces SpawnError to this caller; the session records
            // itself Failed as well.
            handle.send_op(SessionOp::Start).await?;
        }
        Ok(CommandReply::Started {
            id: url.to_string(),
        })
    }

    pub async fn pause_download(&self, url: &str) -> EngineResult<CommandReply> {
        let handle = self.lookup(url).await?;
        let state = handle.send_op(SessionOp::Pause).await?;
        Ok(CommandReply::Ack { state })
    }

    pub async fn resume_download(&self, url: &str) -> EngineResult<CommandReply> {
        let handle = self.lookup(url).await?;
        let state = handle.send_op(SessionOp::Resume).await?;
        Ok(CommandReply::Ack { state })
    }

    /// Cancel wins over any in-flight command for the same session; on
    /// an already-terminal session this is a no-op acknowledgment.
    pub async fn cancel_download(&self, url: &str) -> EngineResult<CommandReply> {
        let handle = self.lookup(url).await?;
        let state = handle.cancel_and_wait().await;
        Ok(CommandReply::Ack { state })
    }

    pub async fn session_status(&self, url: &str) -> EngineResult<SessionSnapshot> {
        Ok(self.lookup(url).await?.snapshot())
    }

    /// Evict a session record, canceling it first if still live.
    pub async fn remove_session(&self, url: &str) -> EngineResult<SessionSnapshot> {
        let handle = self.lookup(url).await?;
        if handle.is_live() {
            handle.cancel_and_wait().await;
        }
        let removed = self
            .registry
            .remove(url)
            .await
            .ok_or_else(|| EngineError::SessionNotFound(url.to_string()))?;
        Ok(removed.snapshot())
    }

    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// Cancel every live session and wait for each to settle. Bounded
    /// by the per-session termination grace period.
    pub async fn shutdown(&self) {
        let live = self.registry.live_handles().await;
        if !live.is_empty() {
            info!("Engine shutdown: canceling {} live session(s)", live.len());
        }
        for handle in live {
            handle.cancel_and_wait().await;
        }
    }

    async fn lookup(&self, url: &str) -> EngineResult<crate::session::SessionHandle> {
        self.registry
            .get(url)
            .await
            .ok_or_else(|| EngineError::SessionNotFound(url.to_string()))
    }
}
