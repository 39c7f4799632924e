/// Muse Media Engine - download and transcode orchestration core.
///
/// Drives an external downloader (yt-dlp) per source URL with
/// pause/resume/cancel, and an external ffmpeg to merge separately
/// downloaded video and audio. The application shell talks to the
/// engine through [`Engine::dispatch`] with the closed command set in
/// `muse_shared::protocol`, and observes lifecycle through
/// [`Engine::subscribe`].
pub mod config;
pub mod locate;
pub mod merge;
pub mod process;
pub mod progress;
pub mod registry;
pub mod router;
pub mod session;

#[cfg(test)]
mod testutil;

pub use config::EngineConfig;
pub use router::Engine;
