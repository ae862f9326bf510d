//! Accept loop and per-connection session lifecycle
//!
//! Strictly sequential: accept, drain the connection into a fresh session,
//! encode that session, and only then accept the next connection.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use color_eyre::{eyre::WrapErr, Result};
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::decoder::FrameDecoder;
use super::session::Session;
use crate::error::DecodeError;
use crate::pipeline::encoder::{EncodeOutcome, EncodingPipeline};
use crate::{Config, StorageConfig};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Why a session's frame stream stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer closed on a frame boundary
    Closed,
    /// Length prefix outside the accepted range
    ProtocolViolation(String),
    /// Peer closed part way through a frame
    Truncated(String),
    Transport(String),
    /// A frame could not be written to disk
    Store(String),
    Cancelled,
}

impl SessionEnd {
    /// Ended the way a well-behaved device ends a stream
    pub fn is_clean(&self) -> bool {
        matches!(self, SessionEnd::Closed)
    }
}

impl From<DecodeError> for SessionEnd {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::InvalidLength { .. } => SessionEnd::ProtocolViolation(e.to_string()),
            DecodeError::Truncated { .. } => SessionEnd::Truncated(e.to_string()),
            DecodeError::Io(_) => SessionEnd::Transport(e.to_string()),
            DecodeError::Cancelled => SessionEnd::Cancelled,
        }
    }
}

/// Report published after a session's encode step finishes
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub peer: SocketAddr,
    pub dir: PathBuf,
    pub frames: u64,
    pub bytes: u64,
    pub end: SessionEnd,
    pub encode: EncodeOutcome,
}

pub struct CaptureServer {
    listener: TcpListener,
    storage: StorageConfig,
    frame_limit: u32,
    pipeline: EncodingPipeline,
    reports: Option<flume::Sender<SessionSummary>>,
}

impl CaptureServer {
    pub async fn bind(config: &Config) -> Result<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .wrap_err_with(|| format!("Failed to bind {}", addr))?;

        info!("Listening for devices on {}", listener.local_addr()?);
        info!("Sessions will be stored under {}", config.storage.root.display());

        Ok(Self {
            listener,
            storage: config.storage.clone(),
            frame_limit: config.protocol.frame_limit(),
            pipeline: EncodingPipeline::new(config.encoder.clone()),
            reports: None,
        })
    }

    /// Publish a [`SessionSummary`] after every session
    pub fn with_reports(mut self, tx: flume::Sender<SessionSummary>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve connections one at a time until `cancel` fires.
    ///
    /// Cancellation stops the wait for the next connection. A session already
    /// running stops reading, but its encode step always runs to completion.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }

            let Some(summary) = self.serve(stream, peer, &cancel).await else {
                continue;
            };

            if let Some(tx) = &self.reports {
                if tx.send_async(summary).await.is_err() {
                    warn!("Session report receiver dropped");
                }
            }
        }

        Ok(())
    }

    /// Run one full session over `stream`: capture, close, encode.
    ///
    /// Returns `None` only when the session directory could not be created, in
    /// which case the connection is dropped without reading.
    #[instrument(skip_all, fields(peer = %peer))]
    pub async fn serve<S>(
        &self,
        stream: S,
        peer: SocketAddr,
        cancel: &CancellationToken,
    ) -> Option<SessionSummary>
    where
        S: AsyncRead + Unpin,
    {
        info!("Device connected");
        metrics::counter!("stasis_sessions_total").increment(1);

        let mut session =
            match Session::create(&self.storage.root, &Local::now(), self.storage.image_format)
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    error!("Could not start session: {}", e);
                    return None;
                }
            };

        // Decoder owns the stream; it is dropped (and the connection closed) here
        let end = capture(
            FrameDecoder::new(stream, self.frame_limit),
            &mut session,
            cancel,
        )
        .await;

        match &end {
            SessionEnd::Closed => {
                info!("Device disconnected after {} frames", session.frame_count())
            }
            SessionEnd::Cancelled => {
                let frames = session.frame_count();
                info!("Capture interrupted by shutdown after {} frames", frames)
            }
            SessionEnd::Truncated(reason) => warn!("Stream truncated: {}", reason),
            SessionEnd::ProtocolViolation(reason) => {
                warn!("Protocol violation, closing connection: {}", reason)
            }
            SessionEnd::Transport(reason) => error!("Connection error: {}", reason),
            SessionEnd::Store(reason) => error!("Failed to store frame: {}", reason),
        }

        let closed = session.close();
        let encode = self
            .pipeline
            .encode_and_clean(&closed.dir, closed.format)
            .await;

        Some(SessionSummary {
            peer,
            dir: closed.dir,
            frames: closed.frame_count,
            bytes: closed.bytes_written,
            end,
            encode,
        })
    }
}

/// Feed decoded frames into `session` until the stream ends for any reason.
async fn capture<R>(
    mut decoder: FrameDecoder<R>,
    session: &mut Session,
    cancel: &CancellationToken,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
{
    loop {
        match decoder.next_frame_or_cancel(cancel).await {
            Ok(Some(frame)) => {
                if let Err(e) = session.save(&frame).await {
                    return SessionEnd::Store(e.to_string());
                }
            }
            Ok(None) => return SessionEnd::Closed,
            Err(e) => return e.into(),
        }
    }
}
