/// Data model shared between the engine and the application shell.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of a download session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Queued,
    Running,
    Paused,
    Canceled,
    Completed,
    Failed,
}

impl SessionState {
    /// A terminal session accepts no further command-driven transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Canceled | SessionState::Completed | SessionState::Failed
        )
    }

    /// A live session may still transition and owns a process handle
    /// while `Running` or `Paused`.
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Queued => write!(f, "queued"),
            SessionState::Running => write!(f, "running"),
            SessionState::Paused => write!(f, "paused"),
            SessionState::Canceled => write!(f, "canceled"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal result recorded on a session once it completes, fails, or
/// is canceled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code of the downloader process, if it exited normally.
    pub code: Option<i32>,
    /// Short diagnostic (bounded stderr tail or engine-side reason).
    pub error: Option<String>,
}

impl ExitInfo {
    pub fn clean() -> Self {
        Self {
            code: Some(0),
            error: None,
        }
    }
}

/// Download progress parsed from the downloader's stdout.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub percent: Option<f64>,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

/// Serializable view of one session, published on every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session key: the source URL.
    pub id: String,
    pub save_path: PathBuf,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitInfo>,
    pub created_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(id: impl Into<String>, save_path: PathBuf) -> Self {
        Self {
            id: id.into(),
            save_path,
            state: SessionState::Queued,
            progress: None,
            exit: None,
            created_at: Utc::now(),
        }
    }
}

/// State-transition notification broadcast to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: String,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Codec handling for the merge pipeline.
///
/// Stream copy is the default: no re-encoding, no quality loss, minimal
/// latency. Re-encoding is an explicit caller choice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CodecPolicy {
    StreamCopy,
    Reencode {
        video_codec: String,
        audio_codec: String,
    },
}

impl Default for CodecPolicy {
    fn default() -> Self {
        CodecPolicy::StreamCopy
    }
}

/// One merge operation: combine a video file and an audio file into a
/// single output. No state is retained after completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub codec: CodecPolicy,
}

/// Outcome summary of a generic process run (exit code plus bounded
/// output tails).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// Per-state counts over the session registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Canceled.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Queued.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert!(!SessionState::Paused.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SessionState::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let back: SessionState = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(back, SessionState::Paused);
    }

    #[test]
    fn test_codec_policy_default_is_stream_copy() {
        assert_eq!(CodecPolicy::default(), CodecPolicy::StreamCopy);
    }

    #[test]
    fn test_merge_request_codec_defaults_when_absent() {
        let json = r#"{"video_path":"/tmp/v.mp4","audio_path":"/tmp/a.m4a","output_path":"/tmp/out.mp4"}"#;
        let req: MergeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.codec, CodecPolicy::StreamCopy);
    }
}
