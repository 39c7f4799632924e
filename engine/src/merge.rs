/// Merge pipeline: drive the external ffmpeg to combine separately
/// downloaded video and audio into one output file, plus a generic
/// ffmpeg runner for shell-supplied argument vectors.
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use muse_shared::errors::{EngineError, EngineResult};
use muse_shared::models::{CodecPolicy, MergeRequest, ProcessSummary};

use crate::process::{LaunchSpec, ProcessExit, ProcessLauncher};

const STDOUT_TAIL_LINES: usize = 16;

pub struct MergePipeline {
    ffmpeg_bin: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
}

impl MergePipeline {
    pub fn new(ffmpeg_bin: PathBuf, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            ffmpeg_bin,
            launcher,
        }
    }

    /// Combine `video_path` and `audio_path` into `output_path`.
    ///
    /// Atomic outcome: on any non-success return there is no file at
    /// `output_path`; on success the output exists and the inputs are
    /// untouched.
    pub async fn merge(&self, req: &MergeRequest) -> EngineResult<PathBuf> {
        // Cheap validation before spending a process slot.
        validate_input(&req.video_path)?;
        validate_input(&req.audio_path)?;
        if req.output_path.as_os_str().is_empty() {
            return Err(EngineError::InputMissing(req.output_path.clone()));
        }

        let spec = merge_spec(&self.ffmpeg_bin, req);
        info!(
            "Merging {:?} + {:?} -> {:?}",
            req.video_path, req.audio_path, req.output_path
        );

        let mut process = self.launcher.launch(&spec).await?;
        let exit = process.wait().await;

        if exit.success() {
            if req.output_path.is_file() {
                info!("Merge completed -> {:?}", req.output_path);
                Ok(req.output_path.clone())
            } else {
                Err(EngineError::MergeFailed {
                    code: exit.code,
                    detail: "merge reported success but produced no output".to_string(),
                })
            }
        } else {
            discard_output(&req.output_path);
            let detail = match exit.lost {
                Some(reason) => format!("process lost: {}", reason),
                None => exit.stderr_tail,
            };
            Err(EngineError::MergeFailed {
                code: exit.code,
                detail,
            })
        }
    }

    /// Run ffmpeg with a caller-supplied argument vector and report the
    /// exit code plus bounded output tails. Non-zero exit is an error
    /// carrying the captured stderr.
    pub async fn run_ffmpeg(&self, args: &[String]) -> EngineResult<ProcessSummary> {
        let spec = LaunchSpec::new(&self.ffmpeg_bin, args.to_vec());
        let mut process = self.launcher.launch(&spec).await?;

        // Drain stdout while waiting so the pipe never backs up.
        let collector = process.take_stdout_lines().map(|mut rx| {
            tokio::spawn(async move {
                let mut tail: VecDeque<String> = VecDeque::with_capacity(STDOUT_TAIL_LINES);
                while let Some(line) = rx.recv().await {
                    if tail.len() == STDOUT_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let ProcessExit {
            code,
            stderr_tail,
            lost,
        } = process.wait().await;
        let stdout_tail = match collector {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if let Some(reason) = lost {
            return Err(EngineError::ProcessLost(reason));
        }
        if code != Some(0) {
            return Err(EngineError::FfmpegFailed {
                code,
                detail: stderr_tail,
            });
        }
        Ok(ProcessSummary {
            code,
            stdout_tail,
            stderr_tail,
        })
    }
}

/// Inputs must exist and be non-empty files.
fn validate_input(path: &Path) -> EngineResult<()> {
    if path.as_os_str().is_empty() {
        return Err(EngineError::InputMissing(path.to_path_buf()));
    }
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(EngineError::InputMissing(path.to_path_buf())),
    }
}

/// Never leave a corrupt artifact behind at the output path.
fn discard_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Removed partial merge output {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial merge output {:?}: {}", path, e),
    }
}

/// Argument vector for one merge. Stream copy by default; re-encoding
/// only when the caller asks for it.
fn merge_spec(ffmpeg_bin: &Path, req: &MergeRequest) -> LaunchSpec {
    let mut args = vec![
        "-y".to_string(),
        "-nostdin".to_string(),
        "-hide_banner".to_string(),
        "-i".to_string(),
        req.video_path.display().to_string(),
        "-i".to_string(),
        req.audio_path.display().to_string(),
    ];
    match &req.codec {
        CodecPolicy::StreamCopy => {
            args.push("-c".to_string());
            args.push("copy".to_string());
        }
        CodecPolicy::Reencode {
            video_codec,
            audio_codec,
        } => {
            args.push("-c:v".to_string());
            args.push(video_codec.clone());
            args.push("-c:a".to_string());
            args.push(audio_codec.clone());
        }
    }
    args.push(req.output_path.display().to_string());
    LaunchSpec::new(ffmpeg_bin, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeLauncher, FakeScript};
    use std::io::Write;

    fn write_file(path: &Path, contents: &[u8]) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents).unwrap();
    }

    fn request(dir: &Path) -> MergeRequest {
        MergeRequest {
            video_path: dir.join("v.mp4"),
            audio_path: dir.join("a.m4a"),
            output_path: dir.join("out.mp4"),
            codec: CodecPolicy::StreamCopy,
        }
    }

    #[test]
    fn test_stream_copy_args() {
        let req = MergeRequest {
            video_path: PathBuf::from("/tmp/v.mp4"),
            audio_path: PathBuf::from("/tmp/a.m4a"),
            output_path: PathBuf::from("/tmp/out.mp4"),
            codec: CodecPolicy::StreamCopy,
        };
        let spec = merge_spec(Path::new("ffmpeg"), &req);
        assert_eq!(
            spec.args,
            vec![
                "-y",
                "-nostdin",
                "-hide_banner",
                "-i",
                "/tmp/v.mp4",
                "-i",
                "/tmp/a.m4a",
                "-c",
                "copy",
                "/tmp/out.mp4"
            ]
        );
    }

    #[test]
    fn test_reencode_args() {
        let req = MergeRequest {
            video_path: PathBuf::from("/tmp/v.mp4"),
            audio_path: PathBuf::from("/tmp/a.m4a"),
            output_path: PathBuf::from("/tmp/out.mp4"),
            codec: CodecPolicy::Reencode {
                video_codec: "libx264".to_string(),
                audio_codec: "aac".to_string(),
            },
        };
        let spec = merge_spec(Path::new("ffmpeg"), &req);
        let args: Vec<&str> = spec.args.iter().map(|s| s.as_str()).collect();
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
    }

    #[tokio::test]
    async fn test_missing_input_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new());
        let pipeline = MergePipeline::new(PathBuf::from("ffmpeg"), launcher.clone());

        // Neither input exists.
        let err = pipeline.merge(&request(dir.path())).await.err().unwrap();
        assert_eq!(err.code(), "INPUT_MISSING");
        assert_eq!(launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path());
        write_file(&req.video_path, b"");
        write_file(&req.audio_path, b"audio");

        let launcher = Arc::new(FakeLauncher::new());
        let pipeline = MergePipeline::new(PathBuf::from("ffmpeg"), launcher.clone());
        let err = pipeline.merge(&req).await.err().unwrap();
        assert_eq!(err.code(), "INPUT_MISSING");
        assert_eq!(launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_merge_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path());
        write_file(&req.video_path, b"video");
        write_file(&req.audio_path, b"audio");
        // Simulate ffmpeg having written a partial file before dying.
        write_file(&req.output_path, b"partial");

        let launcher = Arc::new(FakeLauncher::new());
        launcher.push(FakeScript::Exit {
            code: 1,
            stderr: "Invalid data found when processing input".to_string(),
        });
        let pipeline = MergePipeline::new(PathBuf::from("ffmpeg"), launcher.clone());

        let err = pipeline.merge(&req).await.err().unwrap();
        match err {
            EngineError::MergeFailed { code, detail } => {
                assert_eq!(code, Some(1));
                assert!(detail.contains("Invalid data"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!req.output_path.exists());
        // Inputs are untouched.
        assert!(req.video_path.exists());
        assert!(req.audio_path.exists());
    }

    #[tokio::test]
    async fn test_clean_exit_without_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path());
        write_file(&req.video_path, b"video");
        write_file(&req.audio_path, b"audio");

        let launcher = Arc::new(FakeLauncher::new());
        launcher.push(FakeScript::Exit {
            code: 0,
            stderr: String::new(),
        });
        let pipeline = MergePipeline::new(PathBuf::from("ffmpeg"), launcher.clone());

        let err = pipeline.merge(&req).await.err().unwrap();
        assert_eq!(err.code(), "MERGE_FAILED");
    }

    #[tokio::test]
    async fn test_run_ffmpeg_nonzero_exit_is_error() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push(FakeScript::Exit {
            code: 2,
            stderr: "unknown option".to_string(),
        });
        let pipeline = MergePipeline::new(PathBuf::from("ffmpeg"), launcher.clone());

        let err = pipeline
            .run_ffmpeg(&["-bogus".to_string()])
            .await
            .err()
            .unwrap();
        match err {
            EngineError::FfmpegFailed { code, detail } => {
                assert_eq!(code, Some(2));
                assert!(detail.contains("unknown option"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_ffmpeg_passes_args_verbatim() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.push(FakeScript::Exit {
            code: 0,
            stderr: String::new(),
        });
        let pipeline = MergePipeline::new(PathBuf::from("ffmpeg"), launcher.clone());

        let args = vec!["-version".to_string()];
        let summary = pipeline.run_ffmpeg(&args).await.unwrap();
        assert_eq!(summary.code, Some(0));
        assert_eq!(launcher.launches()[0].args, args);
    }
}
