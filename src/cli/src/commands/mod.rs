//! CLI command definitions and dispatch.

mod inspect;
mod login;
mod logout;
mod publish;

use clap::{Args, Parser, Subcommand, ValueEnum};
use kontext_core::{CredentialSource, KontextConfig, LogLevel};

/// Default registry for login/logout.
const DEFAULT_SERVER: &str = "index.docker.io";

/// Kontext: publish a local directory as an incremental, self-extracting image.
#[derive(Parser)]
#[command(name = "kontext", version, about)]
pub struct Cli {
    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true, env = "KONTEXT_LOG_LEVEL", default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Publish a directory as a context image, reusing the previous round
    Publish(publish::PublishArgs),
    /// Show the manifest embedded in a published context image
    Inspect(inspect::InspectArgs),
    /// Store registry credentials
    Login(login::LoginArgs),
    /// Remove stored registry credentials
    Logout(logout::LogoutArgs),
}

/// Registry connection options shared by commands that talk to a registry.
#[derive(Args, Debug, Clone, Default)]
pub struct RegistryArgs {
    /// Registry reached over plain HTTP (repeatable)
    #[arg(
        long = "insecure-registry",
        env = "KONTEXT_INSECURE_REGISTRIES",
        value_delimiter = ','
    )]
    pub insecure_registries: Vec<String>,

    /// Never send registry credentials
    #[arg(long)]
    pub anonymous: bool,
}

impl RegistryArgs {
    /// Apply these options to a configuration.
    pub fn apply(&self, config: &mut KontextConfig) {
        config.insecure_registries = self.insecure_registries.clone();
        if self.anonymous {
            config.credentials = CredentialSource::Anonymous;
        }
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = KontextConfig {
        log_level: cli.log_level,
        ..Default::default()
    };

    match cli.command {
        Command::Publish(args) => publish::execute(args, config).await,
        Command::Inspect(args) => inspect::execute(args, config).await,
        Command::Login(args) => login::execute(args).await,
        Command::Logout(args) => logout::execute(args).await,
    }
}
