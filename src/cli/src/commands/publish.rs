//! `kontext publish` command: publish a directory as a context image.

use std::path::PathBuf;

use clap::Args;
use kontext_core::{ChangeDetection, KontextConfig, DEFAULT_BASE_IMAGE};
use kontext_runtime::{publish, ImageReference, PublishOutcome, PublishRequest, RegistryClient};

use super::RegistryArgs;
use crate::output::{format_bytes, new_table};

#[derive(Args)]
pub struct PublishArgs {
    /// Directory to publish
    #[arg(short, long, value_parser = parse_directory)]
    pub directory: PathBuf,

    /// Image reference to publish to (registry/repository:tag)
    #[arg(short, long, value_parser = parse_target)]
    pub tag: ImageReference,

    /// Build the layers but do not push
    #[arg(long)]
    pub dry_run: bool,

    /// Base image used when no previous context image is usable
    #[arg(long, env = "KONTEXT_BASE_IMAGE", default_value = DEFAULT_BASE_IMAGE)]
    pub base_image: String,

    /// How previously published files are checked for changes
    #[arg(long, env = "KONTEXT_CHANGE_DETECTION", default_value_t = ChangeDetection::Presence)]
    pub change_detection: ChangeDetection,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

fn parse_directory(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if !path.is_dir() {
        return Err(format!("{} is not a directory", s));
    }
    Ok(path)
}

fn parse_target(s: &str) -> Result<ImageReference, String> {
    ImageReference::parse_target(s).map_err(|e| e.to_string())
}

pub async fn execute(
    args: PublishArgs,
    mut config: KontextConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    config.default_base_image = args.base_image;
    config.change_detection = args.change_detection;
    args.registry.apply(&mut config);

    let client = RegistryClient::new(&config);
    let request = PublishRequest {
        directory: args.directory,
        target: args.tag.clone(),
        dry_run: args.dry_run,
    };
    let outcome = publish(&config, &client, request).await?;

    let summary = outcome.summary();
    let mut table = new_table(&["BASE", "ADDED", "REMOVED", "WHITEOUTS", "DATA LAYER", "MANIFEST LAYER"]);
    table.add_row(vec![
        summary.base.to_string(),
        summary.included.to_string(),
        summary.removed.to_string(),
        summary.whiteouts.to_string(),
        format_bytes(summary.data_layer_bytes as u64),
        format_bytes(summary.manifest_layer_bytes as u64),
    ]);

    match outcome {
        PublishOutcome::Unchanged(_) => {
            println!("No changes, {} is up to date", args.tag);
        }
        PublishOutcome::DryRun { .. } => {
            println!("{table}");
            println!("Dry run: not pushed to {}", args.tag);
        }
        PublishOutcome::Published { push, .. } => {
            println!("{table}");
            println!("Published {}", push.manifest_url);
        }
    }
    Ok(())
}
