/// Discovery of the external downloader and ffmpeg binaries.
///
/// Checks an explicit env override first, then common install locations,
/// then `which`, and finally falls back to a bare PATH name. The shell
/// is expected to have provisioned the binaries (bundled-asset copy and
/// executable bit); spawn-time validation catches anything missing.
use std::path::PathBuf;
use tracing::{info, warn};

/// Locate the downloader executable (yt-dlp).
pub fn find_downloader() -> PathBuf {
    find_binary("MUSE_DOWNLOADER_BIN", "yt-dlp")
}

/// Locate the merge/transcode executable (ffmpeg).
pub fn find_ffmpeg() -> PathBuf {
    find_binary("MUSE_FFMPEG_BIN", "ffmpeg")
}

fn find_binary(env_key: &str, name: &str) -> PathBuf {
    if let Ok(explicit) = std::env::var(env_key) {
        return PathBuf::from(explicit);
    }

    let common_dirs = [
        "/usr/bin",
        "/usr/local/bin",
        "/opt/homebrew/bin",
        "/opt/local/bin",
        "/snap/bin",
    ];
    for dir in &common_dirs {
        let candidate = PathBuf::from(dir).join(name);
        if candidate.exists() {
            info!("Found {} at {:?}", name, candidate);
            return candidate;
        }
    }

    // $HOME/.local/bin covers pip-installed yt-dlp.
    if let Some(home) = std::env::var_os("HOME") {
        let candidate = PathBuf::from(home).join(".local/bin").join(name);
        if candidate.exists() {
            info!("Found {} at {:?}", name, candidate);
            return candidate;
        }
    }

    #[cfg(unix)]
    if let Ok(output) = std::process::Command::new("which").arg(name).output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                info!("Found {} via which: {}", name, path);
                return PathBuf::from(path);
            }
        }
    }

    warn!(
        "Could not find {} in common locations, falling back to PATH lookup",
        name
    );
    PathBuf::from(name)
}
