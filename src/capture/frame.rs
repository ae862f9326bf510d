use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Largest frame accepted off the wire. Guards allocation against a corrupt length field.
pub const MAX_FRAME_SIZE: u32 = 50_000_000;

/// Width of the zero-padded index in frame file names (`000000.jpg`)
pub const INDEX_WIDTH: usize = 6;

/// One decoded image unit, payload never interpreted beyond its length
#[derive(Clone)]
pub struct Frame {
    /// Immutable encoded image bytes
    pub data: Bytes,

    /// Arrival timestamp for write latency tracking
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame").field("len", &self.data.len()).finish()
    }
}

/// Image formats a device may stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }

    /// File name for the frame at `index`
    pub fn file_name(&self, index: u64) -> String {
        format!("{:0width$}.{}", index, self.extension(), width = INDEX_WIDTH)
    }

    /// printf-style input pattern matching [`ImageFormat::file_name`]
    pub fn input_pattern(&self) -> String {
        format!("%0{}d.{}", INDEX_WIDTH, self.extension())
    }

    /// Whether `name` looks like a frame file this format produced
    pub fn is_frame_file(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((stem, ext)) => {
                ext == self.extension()
                    && stem.len() >= INDEX_WIDTH
                    && stem.bytes().all(|b| b.is_ascii_digit())
            }
            None => false,
        }
    }
}
