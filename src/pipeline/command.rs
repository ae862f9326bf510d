use crate::capture::frame::ImageFormat;
use crate::EncoderConfig;

/// Builds encoder arguments that turn a numbered image sequence into one video.
///
/// The input pattern is relative, so the encoder must run with the session
/// directory as its working directory.
#[derive(Debug, Clone)]
pub struct FfmpegCommandBuilder {
    framerate: u32,
    input_pattern: String,
    video_codec: String,
    preset: String,
    pixel_format: String,
    faststart: bool,
    output_path: String,
}

impl FfmpegCommandBuilder {
    pub fn new(output_path: String) -> Self {
        Self {
            framerate: 30,
            input_pattern: ImageFormat::Jpeg.input_pattern(),
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            pixel_format: "yuv420p".to_string(), // Plays everywhere
            faststart: true,
            output_path,
        }
    }

    /// Builder seeded from the `[encoder]` config section
    pub fn from_config(config: &EncoderConfig, format: ImageFormat, output_path: String) -> Self {
        Self::new(output_path)
            .with_framerate(config.fps)
            .with_input_format(format)
            .with_video_codec(config.codec.clone())
            .with_preset(config.preset.clone())
            .with_pixel_format(config.pixel_format.clone())
            .with_faststart(config.faststart)
    }

    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.framerate = framerate;
        self
    }

    pub fn with_input_format(mut self, format: ImageFormat) -> Self {
        self.input_pattern = format.input_pattern();
        self
    }

    pub fn with_video_codec(mut self, codec: String) -> Self {
        self.video_codec = codec;
        self
    }

    pub fn with_preset(mut self, preset: String) -> Self {
        self.preset = preset;
        self
    }

    pub fn with_pixel_format(mut self, pixel_format: String) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    pub fn with_faststart(mut self, faststart: bool) -> Self {
        self.faststart = faststart;
        self
    }

    pub fn build(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-framerate".to_string(), self.framerate.to_string(),
            "-i".to_string(), self.input_pattern.clone(),
            "-c:v".to_string(), self.video_codec.clone(),
            "-preset".to_string(), self.preset.clone(),
            "-pix_fmt".to_string(), self.pixel_format.clone(),
        ];

        if self.faststart {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }

        args.push(self.output_path.clone());
        args
    }
}
