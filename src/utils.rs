use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, TimeZone};
use color_eyre::{eyre::eyre, Result};
use tokio::process::Command;
use tracing::info;

/// Folder created under the user's videos directory
pub const APP_DIR: &str = "Stasis";

/// Day-level grouping, `YYYY-MM-DD`
pub fn day_dir_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y-%m-%d").to_string()
}

/// Run-level name within a day, `session-HHmmss`
pub fn session_dir_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("session-%H%M%S").to_string()
}

/// `<videos>/Stasis`, falling back to `./Stasis` when the OS has no videos dir
pub fn default_storage_root() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Run `<encoder> -version` and return its first output line
pub async fn probe_encoder(path: &Path) -> Result<String> {
    info!("Probing encoder {}...", path.display());

    let output = Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| eyre!("Failed to run {}: {}", path.display(), e))?;

    if !output.status.success() {
        return Err(eyre!(
            "{} -version exited with {}",
            path.display(),
            output.status
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = stdout.lines().next().unwrap_or_default().trim().to_string();
    info!("Found encoder: {}", version);
    Ok(version)
}
