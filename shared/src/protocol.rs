/// Command protocol between the application shell and the engine.
///
/// The shell drives the engine through a closed set of commands and
/// receives a closed set of replies; both sides serialize as tagged JSON
/// so they can cross a platform-channel boundary unchanged.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::{CodecPolicy, ProcessSummary, SessionSnapshot, SessionState};

/// Commands accepted by the engine. One enum, one dispatch point:
/// adding a variant forces every router to handle it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineCommand {
    StartDownload {
        url: String,
        save_path: PathBuf,
    },
    PauseDownload {
        url: String,
    },
    ResumeDownload {
        url: String,
    },
    CancelDownload {
        url: String,
    },
    MergeFiles {
        video_path: PathBuf,
        audio_path: PathBuf,
        output_path: PathBuf,
        #[serde(default)]
        codec: CodecPolicy,
    },
    RunFfmpeg {
        args: Vec<String>,
    },
    SessionStatus {
        url: String,
    },
    ListSessions,
}

/// Successful command outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandReply {
    /// Download accepted; `id` keys all later commands for this session.
    Started { id: String },
    /// Idempotent acknowledgment carrying the session state after the
    /// command was applied (pause/resume/cancel).
    Ack { state: SessionState },
    Merged { output_path: PathBuf },
    FfmpegDone { summary: ProcessSummary },
    Status { snapshot: SessionSnapshot },
    Sessions { snapshots: Vec<SessionSnapshot> },
}

impl EngineCommand {
    /// Session id this command addresses, if it addresses one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            EngineCommand::StartDownload { url, .. }
            | EngineCommand::PauseDownload { url }
            | EngineCommand::ResumeDownload { url }
            | EngineCommand::CancelDownload { url }
            | EngineCommand::SessionStatus { url } => Some(url),
            _ => None,
        }
    }
}

// ====== CONVENIENCE BUILDERS ======

/// Build a start command.
pub fn start_command(url: impl Into<String>, save_path: impl Into<PathBuf>) -> EngineCommand {
    EngineCommand::StartDownload {
        url: url.into(),
        save_path: save_path.into(),
    }
}

/// Build a stream-copy merge command.
pub fn merge_command(
    video_path: impl Into<PathBuf>,
    audio_path: impl Into<PathBuf>,
    output_path: impl Into<PathBuf>,
) -> EngineCommand {
    EngineCommand::MergeFiles {
        video_path: video_path.into(),
        audio_path: audio_path.into(),
        output_path: output_path.into(),
        codec: CodecPolicy::StreamCopy,
    }
}
