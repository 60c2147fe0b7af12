use thiserror::Error;

/// Kontext error types
#[derive(Error, Debug)]
pub enum KontextError {
    /// Missing or malformed required input
    #[error("Usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failure while traversing the context directory
    #[error("Walk error: {path} - {message}")]
    WalkError { path: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Registry credentials could not be resolved
    #[error("Credential error: {0}")]
    CredentialError(String),

    /// OCI image error
    #[error("OCI image error: {0}")]
    OciImageError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Layer archive could not be written or decoded
    #[error("Layer error: {0}")]
    LayerError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for KontextError {
    fn from(err: serde_json::Error) -> Self {
        KontextError::SerializationError(err.to_string())
    }
}

/// Result type alias for kontext operations
pub type Result<T> = std::result::Result<T, KontextError>;
