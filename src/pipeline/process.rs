//! Encoder child process with fully captured output

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::EncodeError;

/// A running encoder.
pub struct EncoderProcess {
    child: Child,
}

/// Everything the encoder left behind once it exited
#[derive(Debug)]
pub struct EncoderOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl EncoderOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// `None` when the process was killed by a signal
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }
}

impl EncoderProcess {
    /// Spawn `program args..` inside `working_dir` with stdin closed and
    /// stdout/stderr piped.
    pub fn start(
        program: &Path,
        args: &[String],
        working_dir: &Path,
    ) -> Result<Self, EncodeError> {
        debug!("Spawning {} {:?} in {}", program.display(), args, working_dir.display());

        let child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EncodeError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        Ok(Self { child })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for exit while draining both pipes.
    ///
    /// The three futures run together so neither pipe can fill up and stall
    /// the child.
    pub async fn wait(mut self) -> Result<EncoderOutput, EncodeError> {
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();

        let (status, stdout, stderr) = tokio::try_join!(
            self.child.wait(),
            drain(stdout),
            drain(stderr),
        )?;

        Ok(EncoderOutput {
            status,
            stdout,
            stderr,
        })
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_both_streams_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let process = EncoderProcess::start(
            Path::new("/bin/sh"),
            &sh("echo out; echo err >&2; exit 3"),
            dir.path(),
        )
        .unwrap();

        let output = process.wait().await.unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code(), Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let process = EncoderProcess::start(Path::new("/bin/sh"), &sh("pwd"), dir.path()).unwrap();

        let output = process.wait().await.unwrap();
        assert!(output.success());
        let reported = std::fs::canonicalize(output.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_large_stderr_does_not_deadlock() {
        let dir = tempfile::tempdir().unwrap();
        // Well past a typical 64 KiB pipe buffer
        let process = EncoderProcess::start(
            Path::new("/bin/sh"),
            &sh(concat!(
                "i=0; while [ $i -lt 4000 ]; do ",
                "echo 'frame= 1 fps=0.0 q=0.0 size= 0kB time=00:00:00.00' >&2; ",
                "i=$((i+1)); done"
            )),
            dir.path(),
        )
        .unwrap();

        let output = tokio::time::timeout(std::time::Duration::from_secs(30), process.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stderr.lines().count(), 4000);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = EncoderProcess::start(&dir.path().join("missing"), &[], dir.path());
        assert!(matches!(result, Err(EncodeError::Spawn { .. })));
    }
}
