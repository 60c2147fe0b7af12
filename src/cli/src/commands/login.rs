//! `kontext login` command: store registry credentials.

use std::io::BufRead;

use clap::Args;
use kontext_runtime::CredentialStore;

use super::DEFAULT_SERVER;

#[derive(Args)]
pub struct LoginArgs {
    /// Registry server (default: index.docker.io)
    pub server: Option<String>,

    /// Username
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password
    #[arg(short, long, conflicts_with = "password_stdin")]
    pub password: Option<String>,

    /// Read password from stdin
    #[arg(long)]
    pub password_stdin: bool,
}

fn prompt(label: &str) -> std::io::Result<String> {
    if !label.is_empty() {
        eprint!("{label}: ");
    }
    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

pub async fn execute(args: LoginArgs) -> Result<(), Box<dyn std::error::Error>> {
    let server = args.server.unwrap_or_else(|| DEFAULT_SERVER.to_string());

    let username = match args.username {
        Some(u) => u,
        None if args.password_stdin => {
            return Err("--password-stdin requires --username".into());
        }
        None => prompt("Username")?,
    };

    let password = match (args.password, args.password_stdin) {
        (_, true) => prompt("")?,
        (Some(p), false) => p,
        (None, false) => prompt("Password")?,
    };

    if username.is_empty() || password.is_empty() {
        return Err("Username and password are required".into());
    }

    let store = CredentialStore::default_path()?;
    store.store(&server, &username, &password)?;
    tracing::debug!(server = %server, path = %store.path().display(), "Stored credentials");

    println!("Login Succeeded");
    Ok(())
}
