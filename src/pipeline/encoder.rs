//! Post-session encoding: frames in, one video out, frames removed on success.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use super::command::FfmpegCommandBuilder;
use super::process::EncoderProcess;
use crate::capture::frame::ImageFormat;
use crate::error::EncodeError;
use crate::EncoderConfig;

/// Lines of encoder stderr kept in a failure reason
const STDERR_TAIL_LINES: usize = 20;

/// What happened to a closed session's frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// Missing directory or no frames in it
    Skipped,
    Encoded {
        artifact: PathBuf,
        frames_deleted: usize,
        cleanup_failures: usize,
    },
    /// Frames were left in place for a manual re-run
    Failed { reason: String },
}

impl EncodeOutcome {
    pub fn is_encoded(&self) -> bool {
        matches!(self, EncodeOutcome::Encoded { .. })
    }
}

pub struct EncodingPipeline {
    config: EncoderConfig,
}

impl EncodingPipeline {
    pub fn new(mut config: EncoderConfig) -> Self {
        config.path = resolve_program(config.path);
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Sibling of `dir` named after it: `<parent>/<dir-name>.<container>`
    pub fn artifact_path(&self, dir: &Path) -> Option<PathBuf> {
        let name = dir.file_name()?.to_string_lossy();
        let parent = dir.parent()?;
        Some(parent.join(format!("{}.{}", name, self.config.container)))
    }

    /// Encode every frame in `dir` into the artifact, then delete the frames.
    ///
    /// Never fails: every error is logged and reported as
    /// [`EncodeOutcome::Failed`], and frames are only removed once the encoder
    /// exited cleanly and the artifact exists.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn encode_and_clean(&self, dir: &Path, format: ImageFormat) -> EncodeOutcome {
        let started = Instant::now();

        let outcome = match self.try_encode_and_clean(dir, format).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Encoding failed, frames kept in {}: {}", dir.display(), e);
                EncodeOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        if let EncodeOutcome::Failed { .. } = outcome {
            metrics::counter!("stasis_encode_failures_total").increment(1);
        }
        metrics::histogram!("stasis_encode_duration_ms")
            .record(started.elapsed().as_millis() as f64);

        outcome
    }

    async fn try_encode_and_clean(
        &self,
        dir: &Path,
        format: ImageFormat,
    ) -> Result<EncodeOutcome, EncodeError> {
        // The encoder runs inside `dir`, so every path handed to it must be absolute
        let dir = match tokio::fs::canonicalize(dir).await {
            Ok(dir) if dir.is_dir() => dir,
            _ => {
                info!("No session directory at {}, nothing to encode", dir.display());
                return Ok(EncodeOutcome::Skipped);
            }
        };

        let frames = list_frames(&dir, format).await?;
        if frames.is_empty() {
            info!("No frames in {}, nothing to encode", dir.display());
            return Ok(EncodeOutcome::Skipped);
        }

        let Some(artifact) = self.artifact_path(&dir) else {
            return Ok(EncodeOutcome::Failed {
                reason: format!("cannot derive an artifact path for {}", dir.display()),
            });
        };

        let args = FfmpegCommandBuilder::from_config(
            &self.config,
            format,
            artifact.to_string_lossy().to_string(),
        )
        .build();

        info!(
            "Encoding {} frames @ {}fps -> {}",
            frames.len(),
            self.config.fps,
            artifact.display()
        );

        let process = EncoderProcess::start(&self.config.path, &args, &dir)?;
        debug!("Encoder pid {:?}", process.id());
        let output = process.wait().await?;

        if !output.stdout.trim().is_empty() {
            debug!("Encoder stdout: {}", output.stdout.trim());
        }

        if !output.success() {
            discard_partial_artifact(&artifact).await;
            error!("Encoder stderr:\n{}", output.stderr.trim_end());
            return Err(EncodeError::Failed {
                status: output.status,
                stderr: stderr_tail(&output.stderr, STDERR_TAIL_LINES),
            });
        }

        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            error!("Encoder stderr:\n{}", output.stderr.trim_end());
            return Err(EncodeError::MissingArtifact { path: artifact });
        }

        debug!("Encoder stderr: {}", output.stderr.trim_end());
        info!("Video saved: {}", artifact.display());

        let (frames_deleted, cleanup_failures) = remove_frames(&frames).await;
        info!("Deleted {} frame files", frames_deleted);
        if cleanup_failures > 0 {
            warn!("{} frame files could not be deleted", cleanup_failures);
        }

        Ok(EncodeOutcome::Encoded {
            artifact,
            frames_deleted,
            cleanup_failures,
        })
    }
}

/// Pin a relative encoder path like `tools/ffmpeg` to the current directory.
///
/// The encoder runs with the session directory as its cwd, where such a path
/// would no longer resolve. Bare names are left for the `PATH` lookup.
fn resolve_program(path: PathBuf) -> PathBuf {
    if path.is_absolute() || path.components().count() < 2 {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            warn!("Cannot resolve encoder path {}: {}", path.display(), e);
            path
        }
    }
}

/// Frame files in `dir`, sorted by name
pub async fn list_frames(dir: &Path, format: ImageFormat) -> Result<Vec<PathBuf>, EncodeError> {
    let list_err = |source: std::io::Error| EncodeError::ListFrames {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_err)?;
    let mut frames = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        let name = entry.file_name();
        if format.is_frame_file(&name.to_string_lossy()) {
            frames.push(entry.path());
        }
    }
    frames.sort();
    Ok(frames)
}

/// Best-effort delete, returns `(deleted, failed)`
async fn remove_frames(frames: &[PathBuf]) -> (usize, usize) {
    let mut deleted = 0;
    let mut failed = 0;
    for frame in frames {
        match tokio::fs::remove_file(frame).await {
            Ok(()) => deleted += 1,
            Err(e) => {
                warn!("Failed to delete {}: {}", frame.display(), e);
                failed += 1;
            }
        }
    }
    (deleted, failed)
}

async fn discard_partial_artifact(artifact: &Path) {
    match tokio::fs::remove_file(artifact).await {
        Ok(()) => warn!("Removed partial artifact {}", artifact.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial artifact {}: {}", artifact.display(), e),
    }
}

fn stderr_tail(stderr: &str, lines: usize) -> String {
    let all: Vec<&str> = stderr.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path_is_sibling() {
        let pipeline = EncodingPipeline::new(EncoderConfig::default());
        assert_eq!(
            pipeline.artifact_path(Path::new("/v/Stasis/2024-03-09/session-070503")),
            Some(PathBuf::from("/v/Stasis/2024-03-09/session-070503.mp4"))
        );
        assert_eq!(
            pipeline.artifact_path(Path::new("/v/session-070503-1")),
            Some(PathBuf::from("/v/session-070503-1.mp4"))
        );
        assert_eq!(pipeline.artifact_path(Path::new("/")), None);
    }

    #[test]
    fn test_stderr_tail() {
        assert_eq!(stderr_tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(stderr_tail("only", 5), "only");
        assert_eq!(stderr_tail("", 5), "");
    }

    #[tokio::test]
    async fn test_missing_directory_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = EncodingPipeline::new(EncoderConfig::default());
        let outcome = pipeline
            .encode_and_clean(&root.path().join("gone"), ImageFormat::Jpeg)
            .await;
        assert_eq!(outcome, EncodeOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_empty_directory_is_skipped_without_running_encoder() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("session-000000");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("notes.txt"), b"not a frame").unwrap();

        let pipeline = EncodingPipeline::new(EncoderConfig {
            path: root.path().join("never-run"),
            ..EncoderConfig::default()
        });
        let outcome = pipeline.encode_and_clean(&dir, ImageFormat::Jpeg).await;

        assert_eq!(outcome, EncodeOutcome::Skipped);
        assert!(!root.path().join("session-000000.mp4").exists());
    }

    #[tokio::test]
    async fn test_list_frames_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "000002.jpg",
            "000000.jpg",
            "000001.jpg",
            "thumb.jpg",
            "000003.png",
            "000004.JPG",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let frames = list_frames(dir.path(), ImageFormat::Jpeg).await.unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["000000.jpg", "000001.jpg", "000002.jpg"]);
    }

    #[test]
    fn test_relative_encoder_path_is_pinned_to_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let pipeline = |path: &str| {
            EncodingPipeline::new(EncoderConfig {
                path: PathBuf::from(path),
                ..EncoderConfig::default()
            })
        };

        assert_eq!(pipeline("ffmpeg").config().path, PathBuf::from("ffmpeg"));
        assert_eq!(
            pipeline("/usr/bin/ffmpeg").config().path,
            PathBuf::from("/usr/bin/ffmpeg")
        );
        assert_eq!(
            pipeline("tools/ffmpeg").config().path,
            cwd.join("tools/ffmpeg")
        );
        assert_eq!(pipeline("./ffmpeg").config().path, cwd.join("./ffmpeg"));
    }
}
