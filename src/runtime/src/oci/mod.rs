//! Registry side of kontext.
//!
//! Resolves base images, reads layers back out of them, appends the
//! synthesized layers and pushes the result.
//!
//! ```text
//!   ImageReference ──▶ ImageRegistry::resolve ──▶ RemoteImage
//!                                                   │ append_layers
//!                                                   ▼
//!                       ImageRegistry::push ◀── RemoteImage'
//! ```

pub mod credentials;
pub mod docker_config;
pub mod image;
pub mod layers;
pub mod memory;
pub mod reference;
pub mod registry;

pub use credentials::{normalize_registry, Credential, CredentialStore};
pub use docker_config::DockerConfig;
pub use image::{LayerHistory, NewLayer, RemoteImage};
pub use layers::{decompress, read_file, uncompressed_layer};
pub use memory::MemoryRegistry;
pub use reference::ImageReference;
pub use registry::{ImageRegistry, PushResult, RegistryAuth, RegistryClient};
