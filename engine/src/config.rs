/// Engine configuration, environment-driven with code defaults.
use std::path::PathBuf;
use std::time::Duration;

use crate::locate;

/// Runtime configuration for the engine. Built once at startup and
/// shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Downloader executable (yt-dlp or compatible).
    pub downloader_bin: PathBuf,
    /// Merge/transcode executable (ffmpeg).
    pub ffmpeg_bin: PathBuf,
    /// Default directory for downloads when the caller's save path is
    /// relative.
    pub download_dir: PathBuf,
    /// How long a graceful termination may take before escalating to a
    /// kill.
    pub cancel_grace: Duration,
    /// How many trailing stderr lines to keep per process.
    pub stderr_tail_lines: usize,
}

impl EngineConfig {
    /// Read configuration from the environment (`.env` honored),
    /// applying defaults for anything unset.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let download_dir = std::env::var("MUSE_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./downloads"));
        let cancel_grace_secs: u64 = std::env::var("MUSE_CANCEL_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let stderr_tail_lines: usize = std::env::var("MUSE_STDERR_TAIL_LINES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(16);

        Self {
            downloader_bin: locate::find_downloader(),
            ffmpeg_bin: locate::find_ffmpeg(),
            download_dir,
            cancel_grace: Duration::from_secs(cancel_grace_secs),
            stderr_tail_lines,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            downloader_bin: PathBuf::from("yt-dlp"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            download_dir: PathBuf::from("./downloads"),
            cancel_grace: Duration::from_secs(5),
            stderr_tail_lines: 16,
        }
    }
}
