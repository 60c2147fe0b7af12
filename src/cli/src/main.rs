//! Kontext CLI entry point.

use clap::Parser;

use kontext_cli::commands::{dispatch, Cli};
use kontext_cli::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_level, cli.log_format);

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
