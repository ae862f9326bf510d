pub mod capture;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};

use capture::frame::{ImageFormat, MAX_FRAME_SIZE};
use color_eyre::Result;
use serde::{Deserialize, Serialize};

pub use capture::listener::{CaptureServer, SessionEnd, SessionSummary};
pub use pipeline::encoder::{EncodeOutcome, EncodingPipeline};

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "stasis.toml";

/// Environment prefix, e.g. `STASIS_SERVER__PORT=9100`
pub const ENV_PREFIX: &str = "STASIS";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub protocol: ProtocolConfig,
    pub encoder: EncoderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Sessions land in `<root>/<YYYY-MM-DD>/session-<HHmmss>`
    pub root: PathBuf,
    pub image_format: ImageFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub max_frame_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Executable path; a bare name is resolved through `PATH`
    pub path: PathBuf,
    pub fps: u32,
    pub codec: String,
    pub preset: String,
    pub pixel_format: String,
    pub container: String,
    pub faststart: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 9000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: utils::default_storage_root(),
            image_format: ImageFormat::Jpeg,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ffmpeg"),
            fps: 30,
            codec: "libx264".into(),
            preset: "veryfast".into(),
            pixel_format: "yuv420p".into(),
            container: "mp4".into(),
            faststart: true,
        }
    }
}

impl ProtocolConfig {
    /// Configured limit, never above the hard ceiling and never zero
    pub fn frame_limit(&self) -> u32 {
        self.max_frame_size.clamp(1, MAX_FRAME_SIZE)
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `STASIS_*` environment variables.
    ///
    /// An explicitly named file must exist; the default `stasis.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}
