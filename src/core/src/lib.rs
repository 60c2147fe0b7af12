//! Kontext Core - Shared Types
//!
//! Error taxonomy, the configuration object threaded through the resolver
//! and publisher, and the fixed paths that define a kontext image layout.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{
    ChangeDetection, CredentialSource, KontextConfig, LogLevel, DEFAULT_BASE_IMAGE,
    MANIFEST_PATH, MOUNT_PATH, WORKSPACE_PATH,
};
pub use error::{KontextError, Result};

/// Kontext version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
