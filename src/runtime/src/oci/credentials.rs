//! Registry credential store.
//!
//! Credentials saved by `kontext login` live in
//! `~/.kontext/auth/credentials.json`, keyed by normalized registry host.
//! Writes go to a temporary sibling first and are renamed into place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kontext_core::error::{KontextError, Result};
use serde::{Deserialize, Serialize};

/// Username and password for one registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    registries: BTreeMap<String, Credential>,
}

/// File-backed credential store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store at `~/.kontext/auth/credentials.json`.
    pub fn default_path() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            KontextError::CredentialError(
                "Cannot determine home directory for credential store".to_string(),
            )
        })?;
        Ok(Self::new(
            home.join(".kontext").join("auth").join("credentials.json"),
        ))
    }

    /// Store at `path`, or the default location when `None`.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Ok(Self::new(p.to_path_buf())),
            None => Self::default_path(),
        }
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save credentials for a registry, replacing any previous entry.
    pub fn store(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut file = self.load()?;
        file.registries.insert(
            normalize_registry(registry),
            Credential {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
        self.save(&file)
    }

    /// Look up credentials for a registry.
    pub fn get(&self, registry: &str) -> Result<Option<Credential>> {
        Ok(self.load()?.registries.remove(&normalize_registry(registry)))
    }

    /// Forget a registry. Returns whether an entry existed.
    pub fn remove(&self, registry: &str) -> Result<bool> {
        let mut file = self.load()?;
        if file.registries.remove(&normalize_registry(registry)).is_none() {
            return Ok(false);
        }
        self.save(&file)?;
        Ok(true)
    }

    /// Registries with stored credentials, sorted.
    pub fn list_registries(&self) -> Result<Vec<String>> {
        Ok(self.load()?.registries.into_keys().collect())
    }

    fn load(&self) -> Result<CredentialFile> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CredentialFile::default())
            }
            Err(e) => {
                return Err(KontextError::CredentialError(format!(
                    "Failed to read credential store {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&data).map_err(|e| {
            KontextError::CredentialError(format!(
                "Failed to parse credential store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, file: &CredentialFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KontextError::CredentialError(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(file)?).map_err(|e| {
            KontextError::CredentialError(format!(
                "Failed to write {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        restrict_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            KontextError::CredentialError(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Docker Hub is reachable under several names; they share one entry.
pub fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().trim_end_matches('/').to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r)
        .to_string();
    match r.as_str() {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => "index.docker.io".to_string(),
        _ => r,
    }
}
