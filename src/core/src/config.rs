use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Directory inside the produced image that holds the context payload.
pub const MOUNT_PATH: &str = "/var/run/kontext";

/// Well-known location of the JSON manifest inside the manifest layer.
pub const MANIFEST_PATH: &str = "/var/lib/kontext/manifest.json";

/// Directory the extractor copies the payload into.
pub const WORKSPACE_PATH: &str = "/workspace";

/// Self-extracting base image used when no prior context can be recovered.
pub const DEFAULT_BASE_IMAGE: &str =
    "gcr.io/mattmoor-public/github.com/mattmoor/kontext/cmd/extractor:latest";

/// Kontext configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KontextConfig {
    /// Base image for the clean-slate case
    pub default_base_image: String,

    /// Where registry credentials come from
    pub credentials: CredentialSource,

    /// How previously published paths are checked for changes
    pub change_detection: ChangeDetection,

    /// Registries reached over plain HTTP (e.g. "localhost:5000")
    pub insecure_registries: Vec<String>,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for KontextConfig {
    fn default() -> Self {
        Self {
            default_base_image: DEFAULT_BASE_IMAGE.to_string(),
            credentials: CredentialSource::default(),
            change_detection: ChangeDetection::default(),
            insecure_registries: Vec::new(),
            log_level: LogLevel::Info,
        }
    }
}

/// Source of registry credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSource {
    /// Credential store file, then the Docker CLI config, then
    /// `REGISTRY_USERNAME`/`REGISTRY_PASSWORD`, then anonymous.
    ///
    /// `store: None` selects `~/.kontext/auth/credentials.json`;
    /// `docker_config: None` selects `$DOCKER_CONFIG` or `~/.docker`.
    Keychain {
        store: Option<PathBuf>,
        #[serde(default)]
        docker_config: Option<PathBuf>,
    },

    /// Never send credentials.
    Anonymous,

    /// Fixed username and password for every registry.
    Basic { username: String, password: String },
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self::Keychain {
            store: None,
            docker_config: None,
        }
    }
}

/// Change detection for paths already recorded in the baseline manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeDetection {
    /// A path present in the baseline is assumed unchanged and is not rehashed.
    #[default]
    Presence,

    /// Known paths are rehashed and re-included when their digest differs.
    Content,
}

impl std::fmt::Display for ChangeDetection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Presence => write!(f, "presence"),
            Self::Content => write!(f, "content"),
        }
    }
}

impl std::str::FromStr for ChangeDetection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "presence" => Ok(Self::Presence),
            "content" => Ok(Self::Content),
            _ => Err(format!(
                "unknown change detection: '{}' (supported: presence, content)",
                s
            )),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown log level: '{}'", s)),
        }
    }
}
