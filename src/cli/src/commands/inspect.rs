//! `kontext inspect` command: show the manifest of a published context image.

use clap::Args;
use kontext_core::KontextConfig;
use kontext_runtime::{BaseResolver, ImageReference, RegistryClient};

use super::RegistryArgs;
use crate::output::{new_table, short_digest};

#[derive(Args)]
pub struct InspectArgs {
    /// Image reference to inspect
    pub image: String,

    /// Print the manifest as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

pub async fn execute(
    args: InspectArgs,
    mut config: KontextConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    args.registry.apply(&mut config);
    let reference = ImageReference::parse(&args.image)?;

    let client = RegistryClient::new(&config);
    let (image, manifest) = BaseResolver::new(&config, &client)
        .discover(&reference)
        .await
        .map_err(|e| format!("No kontext manifest in {}: {}", reference, e))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    println!("Image:   {}", reference);
    println!("Layers:  {}", image.layers().len());
    println!("Entries: {}", manifest.len());
    println!();

    let mut table = new_table(&["PATH", "TYPE", "DIGEST"]);
    for (path, identity) in manifest.iter() {
        if identity.is_empty() {
            table.add_row(vec![path, "dir", ""]);
        } else {
            table.add_row(vec![path, "file", short_digest(identity)]);
        }
    }
    println!("{table}");
    Ok(())
}
