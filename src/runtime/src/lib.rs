//! Kontext Runtime - incremental context images.
//!
//! Walks a local directory, diffs it against the manifest recovered from the
//! previously published image, synthesizes a delta layer plus a manifest
//! layer, and pushes the result on top of the previous image.

#![allow(clippy::result_large_err)]

pub mod base;
pub mod context;
pub mod oci;
pub mod publish;

// Re-export common types
pub use base::{BaseResolver, BaseState, Baseline};
pub use context::{DiffEngine, DiffResult, LayerSynthesizer, Manifest, SynthesizedLayers, TreeWalker};
pub use oci::{CredentialStore, ImageReference, ImageRegistry, MemoryRegistry, RegistryAuth, RegistryClient, RemoteImage};
pub use publish::{publish, DeltaSummary, PublishOutcome, PublishRequest};

/// Kontext Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
