pub mod command;
pub mod encoder;
pub mod process;

pub use command::FfmpegCommandBuilder;
pub use encoder::{EncodeOutcome, EncodingPipeline};
pub use process::{EncoderOutput, EncoderProcess};
