//! Credentials saved by `docker login`.
//!
//! Reads the `auths` section of `config.json` in `$DOCKER_CONFIG` or
//! `~/.docker`. Entries carry either a base64 `auth` of `user:password` or
//! separate `username`/`password` fields. Credential helpers (`credsStore`,
//! `credHelpers`) are not run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use kontext_core::error::{KontextError, Result};
use serde::Deserialize;

use super::credentials::{normalize_registry, Credential};

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl AuthEntry {
    fn credential(&self, path: &Path) -> Result<Option<Credential>> {
        if let Some(encoded) = self.auth.as_deref().filter(|a| !a.is_empty()) {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| {
                    KontextError::CredentialError(format!(
                        "Invalid auth entry in {}",
                        path.display()
                    ))
                })?;
            let (username, password) = decoded.split_once(':').ok_or_else(|| {
                KontextError::CredentialError(format!(
                    "Auth entry in {} is not user:password",
                    path.display()
                ))
            })?;
            return Ok(Some(Credential {
                username: username.to_string(),
                password: password.to_string(),
            }));
        }

        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Some(Credential {
                username: username.clone(),
                password: password.clone(),
            })),
            _ => Ok(None),
        }
    }
}

/// Docker CLI configuration file.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    path: PathBuf,
}

impl DockerConfig {
    /// `config.json` under `dir`, or under `$DOCKER_CONFIG` (else
    /// `~/.docker`) when `None`.
    pub fn open(dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(d) => d.to_path_buf(),
            None => match std::env::var_os("DOCKER_CONFIG") {
                Some(d) => PathBuf::from(d),
                None => dirs::home_dir()
                    .ok_or_else(|| {
                        KontextError::CredentialError(
                            "Cannot determine home directory for Docker config".to_string(),
                        )
                    })?
                    .join(".docker"),
            },
        };
        Ok(Self {
            path: dir.join("config.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Credentials recorded for `registry`. A missing file yields `None`.
    pub fn get(&self, registry: &str) -> Result<Option<Credential>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KontextError::CredentialError(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let file: ConfigFile = serde_json::from_slice(&data).map_err(|e| {
            KontextError::CredentialError(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;

        let wanted = normalize_registry(registry);
        for (key, entry) in &file.auths {
            if registry_host(key) != wanted {
                continue;
            }
            if let Some(credential) = entry.credential(&self.path)? {
                return Ok(Some(credential));
            }
        }
        Ok(None)
    }
}

/// Registry host of an `auths` key such as `https://index.docker.io/v1/`.
fn registry_host(key: &str) -> String {
    let normalized = normalize_registry(key);
    match normalized.split_once('/') {
        Some((host, _)) => normalize_registry(host),
        None => normalized,
    }
}
