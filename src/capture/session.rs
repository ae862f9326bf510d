//! Per-connection capture session and its on-disk frame store

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use tracing::{debug, info};

use super::frame::{Frame, ImageFormat};
use crate::error::SessionError;
use crate::utils;

/// One capture run: a directory plus a dense, zero-based frame counter.
///
/// Constructed per accepted connection and owned by that connection's handler
/// until [`Session::close`] hands the directory to the encoding pipeline.
#[derive(Debug)]
pub struct Session {
    dir: PathBuf,
    format: ImageFormat,
    frame_count: u64,
    bytes_written: u64,
}

/// A session whose frame stream has ended. Nothing writes to its directory again.
#[derive(Debug, Clone)]
pub struct ClosedSession {
    pub dir: PathBuf,
    pub format: ImageFormat,
    pub frame_count: u64,
    pub bytes_written: u64,
}

impl Session {
    /// Create `<root>/<YYYY-MM-DD>/session-<HHmmss>` for `now`.
    ///
    /// The day directory is shared; the session directory is always fresh. A
    /// second session within the same second gets a `-1`, `-2`, ... suffix.
    pub async fn create<Tz: TimeZone>(
        root: &Path,
        now: &DateTime<Tz>,
        format: ImageFormat,
    ) -> Result<Self, SessionError>
    where
        Tz::Offset: std::fmt::Display,
    {
        let day_dir = root.join(utils::day_dir_name(now));
        tokio::fs::create_dir_all(&day_dir)
            .await
            .map_err(|source| SessionError::CreateDir {
                path: day_dir.clone(),
                source,
            })?;

        let base = utils::session_dir_name(now);
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, attempt)
            };
            let dir = day_dir.join(name);

            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    info!("Session directory: {}", dir.display());
                    return Ok(Self {
                        dir,
                        format,
                        frame_count: 0,
                        bytes_written: 0,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} already taken", dir.display());
                    attempt += 1;
                }
                Err(source) => return Err(SessionError::CreateDir { path: dir, source }),
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Path the next saved frame will be written to
    pub fn next_frame_path(&self) -> PathBuf {
        self.dir.join(self.format.file_name(self.frame_count))
    }

    /// Write `frame` verbatim as the next index, then advance the counter.
    ///
    /// The counter only moves after a successful write, so indices stay dense.
    pub async fn save(&mut self, frame: &Frame) -> Result<PathBuf, SessionError> {
        let path = self.next_frame_path();
        tokio::fs::write(&path, &frame.data)
            .await
            .map_err(|source| SessionError::WriteFrame {
                path: path.clone(),
                source,
            })?;

        self.frame_count += 1;
        self.bytes_written += frame.len() as u64;

        metrics::counter!("stasis_frames_saved_total").increment(1);
        metrics::histogram!("stasis_frame_bytes").record(frame.len() as f64);
        debug!(
            index = self.frame_count - 1,
            len = frame.len(),
            latency_us = frame.timestamp.elapsed().as_micros() as u64,
            "frame saved"
        );

        Ok(path)
    }

    pub fn close(self) -> ClosedSession {
        ClosedSession {
            dir: self.dir,
            format: self.format,
            frame_count: self.frame_count,
            bytes_written: self.bytes_written,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::{Local, TimeZone, Utc};

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap()
    }

    #[tokio::test]
    async fn test_create_uses_date_and_time_layout() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::create(root.path(), &fixed_time(), ImageFormat::Jpeg)
            .await
            .unwrap();

        assert_eq!(
            session.dir(),
            root.path().join("2024-03-09").join("session-070503")
        );
        assert!(session.dir().is_dir());
        assert_eq!(session.frame_count(), 0);
    }

    #[tokio::test]
    async fn test_same_second_sessions_get_distinct_dirs() {
        let root = tempfile::tempdir().unwrap();
        let now = fixed_time();

        let first = Session::create(root.path(), &now, ImageFormat::Jpeg).await.unwrap();
        let second = Session::create(root.path(), &now, ImageFormat::Jpeg).await.unwrap();
        let third = Session::create(root.path(), &now, ImageFormat::Jpeg).await.unwrap();

        assert_ne!(first.dir(), second.dir());
        assert!(second.dir().ends_with("session-070503-1"));
        assert!(third.dir().ends_with("session-070503-2"));
    }

    #[tokio::test]
    async fn test_save_writes_dense_indices() {
        let root = tempfile::tempdir().unwrap();
        let mut session = Session::create(root.path(), &Local::now(), ImageFormat::Jpeg)
            .await
            .unwrap();

        let payloads: [&[u8]; 3] = [b"\xff\xd8one", b"\xff\xd8two", b"\xff\xd8three"];
        for payload in payloads {
            session
                .save(&Frame::new(Bytes::from_static(payload)))
                .await
                .unwrap();
        }

        assert_eq!(session.frame_count(), 3);
        for (i, payload) in payloads.iter().enumerate() {
            let path = session.dir().join(format!("{:06}.jpg", i));
            assert_eq!(std::fs::read(&path).unwrap(), *payload);
        }

        let closed = session.close();
        assert_eq!(closed.frame_count, 3);
        assert_eq!(closed.bytes_written, 5 + 5 + 7);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_advance_counter() {
        let root = tempfile::tempdir().unwrap();
        let mut session = Session::create(root.path(), &Local::now(), ImageFormat::Png)
            .await
            .unwrap();
        std::fs::remove_dir(session.dir()).unwrap();

        let err = session
            .save(&Frame::new(Bytes::from_static(b"png")))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::WriteFrame { .. }));
        assert_eq!(session.frame_count(), 0);
        assert!(session.next_frame_path().ends_with("000000.png"));
    }
}
