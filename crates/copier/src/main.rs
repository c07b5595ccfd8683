//! copier - stage a file at a new location

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use rules_ansible_core::logging;
use tracing::debug;

#[derive(Parser)]
#[command(name = "copier")]
#[command(about = "Copy a file, creating the destination's parent directories")]
#[command(version)]
struct Cli {
    /// File to copy; symlinks are followed
    #[arg(long)]
    source: PathBuf,

    /// Where to write the copy
    #[arg(long)]
    destination: PathBuf,
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    copy(&cli.source, &cli.destination)
}

fn copy(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    // fs::copy reads through symlinks
    let bytes = fs::copy(source, destination).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            source.display(),
            destination.display()
        )
    })?;
    debug!("Copied {} bytes to {}", bytes, destination.display());

    Ok(())
}
