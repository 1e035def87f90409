//! UART device discovery and line reading.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::BufReader;

/// First `ttyACM*` device under `dev_dir`, by name.
pub fn find_port(dev_dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut ports: Vec<PathBuf> = std::fs::read_dir(dev_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("ttyACM"))
        .map(|entry| entry.path())
        .collect();
    ports.sort();
    Ok(ports.into_iter().next())
}

/// Opens the device for line reading. Baud rate and framing are left to the
/// device's current settings.
pub async fn open(path: &Path) -> io::Result<BufReader<File>> {
    tracing::info!(port = %path.display(), "opening UART");
    Ok(BufReader::new(File::open(path).await?))
}

#[cfg(test)]
#[path = "uart_tests.rs"]
mod tests;
