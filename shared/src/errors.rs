/// Unified error types for the Muse engine.
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type reported through the command interface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("spawn error: {0}")]
    Spawn(#[from] SpawnError),

    #[error("no session for '{0}'")]
    SessionNotFound(String),

    #[error("input file missing or empty: {0}")]
    InputMissing(PathBuf),

    #[error("merge failed (exit {code:?}): {detail}")]
    MergeFailed { code: Option<i32>, detail: String },

    #[error("ffmpeg failed (exit {code:?}): {detail}")]
    FfmpegFailed { code: Option<i32>, detail: String },

    #[error("process lost: {0}")]
    ProcessLost(String),

    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to start an external process. Never retried automatically;
/// retry policy belongs to the calling layer.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("executable not found: {0}")]
    NotFound(PathBuf),

    #[error("not executable: {0}")]
    NotExecutable(PathBuf),

    #[error("failed to spawn {program}: {source}")]
    Os {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Stable error code for the shell side (display, logging, mapping
    /// onto platform-channel error payloads).
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Spawn(_) => "SPAWN_ERROR",
            EngineError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            EngineError::InputMissing(_) => "INPUT_MISSING",
            EngineError::MergeFailed { .. } => "MERGE_FAILED",
            EngineError::FfmpegFailed { .. } => "FFMPEG_ERROR",
            EngineError::ProcessLost(_) => "PROCESS_LOST",
            EngineError::Unsupported(_) => "UNSUPPORTED",
            EngineError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
