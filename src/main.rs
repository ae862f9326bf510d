//! Stasis frame receiver: stores streamed camera frames and turns each session into a video

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stasis::capture::ImageFormat;
use stasis::{utils, CaptureServer, Config, EncodeOutcome, EncodingPipeline};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ./stasis.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept device connections and encode each session (default)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory sessions are stored under
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Re-run encoding for a session directory whose frames were kept
    Encode {
        session_dir: PathBuf,
        #[arg(long)]
        fps: Option<u32>,
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
}

impl From<FormatArg> for ImageFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Jpeg => ImageFormat::Jpeg,
            FormatArg::Png => ImageFormat::Png,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stasis=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        root: None,
    }) {
        Command::Serve { port, root } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(root) = root {
                config.storage.root = root;
            }
            serve(config).await
        }
        Command::Encode {
            session_dir,
            fps,
            format,
        } => {
            if let Some(fps) = fps {
                config.encoder.fps = fps;
            }
            if let Some(format) = format {
                config.storage.image_format = format.into();
            }
            encode(config, session_dir).await
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Stasis launching...");

    if let Err(e) = utils::probe_encoder(&config.encoder.path).await {
        warn!("Encoder not usable, sessions will keep their frames: {}", e);
    }

    let server = CaptureServer::bind(&config).await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
        shutdown.cancel();
    });

    server.run(cancel).await?;

    info!("Stasis shutting down");
    Ok(())
}

async fn encode(config: Config, session_dir: PathBuf) -> Result<()> {
    let pipeline = EncodingPipeline::new(config.encoder);
    match pipeline
        .encode_and_clean(&session_dir, config.storage.image_format)
        .await
    {
        EncodeOutcome::Encoded { artifact, .. } => {
            info!("Encoded {}", artifact.display());
            Ok(())
        }
        EncodeOutcome::Skipped => Err(eyre!("No frames found in {}", session_dir.display())),
        EncodeOutcome::Failed { reason } => Err(eyre!(reason)),
    }
}
