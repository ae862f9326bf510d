pub mod decoder;
pub mod frame;
pub mod listener;
pub mod session;

pub use decoder::FrameDecoder;
pub use frame::Frame;
pub use frame::ImageFormat;
pub use listener::CaptureServer;
pub use session::{ClosedSession, Session};
