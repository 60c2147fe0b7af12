//! Kontext extractor entry point.
//!
//! Copies the context payload baked into the image into the workspace and
//! exits. Any I/O failure is fatal.

use std::path::PathBuf;

use clap::Parser;
use kontext_core::{MOUNT_PATH, WORKSPACE_PATH};
use tracing_subscriber::EnvFilter;

/// Copy a kontext payload into the build workspace.
#[derive(Parser)]
#[command(name = "kontext-extractor", version, about)]
struct Args {
    /// Directory holding the payload
    #[arg(long, default_value = MOUNT_PATH)]
    source: PathBuf,

    /// Directory to copy the payload into
    #[arg(long, default_value = WORKSPACE_PATH)]
    target: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    match kontext_extractor::extract(&args.source, &args.target) {
        Ok(summary) => {
            tracing::info!(
                source = %args.source.display(),
                workspace = %args.target.display(),
                directories = summary.directories,
                files = summary.files,
                bytes = summary.bytes,
                skipped = summary.skipped,
                "Extracted context"
            );
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
