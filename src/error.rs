//! Error types for frame ingestion and session encoding.
//!
//! Every error here is scoped to a single session. The listener catches them at
//! the per-session boundary, logs them and goes back to accepting, so none of
//! these ever terminate the process.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Which part of a frame the stream closed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    LengthPrefix,
    Payload,
}

impl std::fmt::Display for FrameStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameStage::LengthPrefix => f.write_str("length prefix"),
            FrameStage::Payload => f.write_str("payload"),
        }
    }
}

/// Ways a frame stream can stop short of a clean end-of-stream.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("frame length {length} outside 1..={limit}")]
    InvalidLength { length: i32, limit: u32 },

    #[error("stream closed mid-{stage}: got {received} of {expected} bytes")]
    Truncated {
        stage: FrameStage,
        expected: usize,
        received: usize,
    },

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read cancelled")]
    Cancelled,
}

impl DecodeError {
    /// Length framing can no longer be trusted.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, DecodeError::InvalidLength { .. })
    }

    pub fn is_truncation(&self) -> bool {
        matches!(self, DecodeError::Truncated { .. })
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to create session directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write frame {path}: {source}")]
    WriteFrame {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("failed to launch encoder {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for encoder: {0}")]
    Wait(#[from] std::io::Error),

    #[error("encoder exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("encoder reported success but {path} is missing")]
    MissingArtifact { path: PathBuf },

    #[error("failed to list frames in {path}: {source}")]
    ListFrames {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
