//! Base image resolution.
//!
//! Finds the image previously published to the target tag and recovers the
//! manifest embedded in its last layer. Any failure along the way means "no
//! usable history": the resolver falls back to the configured default base
//! with an empty manifest. Only a failure to resolve the default base itself
//! is reported to the caller.

use kontext_core::error::{KontextError, Result};
use kontext_core::{KontextConfig, MANIFEST_PATH};

use crate::context::Manifest;
use crate::oci::{read_file, uncompressed_layer, ImageReference, ImageRegistry, RemoteImage};

/// Where the baseline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseState {
    /// Previously published image with a recovered manifest
    Resolved,
    /// Default base image with an empty manifest
    CleanSlate,
}

impl std::fmt::Display for BaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolved => write!(f, "resolved"),
            Self::CleanSlate => write!(f, "clean-slate"),
        }
    }
}

/// Base image and baseline manifest for one publish round.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub image: RemoteImage,
    pub manifest: Manifest,
    pub state: BaseState,
}

/// Resolves the baseline for a target reference.
pub struct BaseResolver<'a> {
    registry: &'a dyn ImageRegistry,
    default_base: &'a str,
}

impl<'a> BaseResolver<'a> {
    pub fn new(config: &'a KontextConfig, registry: &'a dyn ImageRegistry) -> Self {
        Self {
            registry,
            default_base: &config.default_base_image,
        }
    }

    /// Baseline for publishing to `target`. Never retries.
    pub async fn resolve(&self, target: &ImageReference) -> Result<Baseline> {
        match self.discover(target).await {
            Ok((image, manifest)) => {
                tracing::info!(
                    reference = %target,
                    entries = manifest.len(),
                    "Resolved previous context image"
                );
                Ok(Baseline {
                    image,
                    manifest,
                    state: BaseState::Resolved,
                })
            }
            Err(e) => {
                tracing::warn!(
                    reference = %target,
                    error = %e,
                    base = %self.default_base,
                    "No usable previous image, starting from the default base"
                );
                self.clean_slate().await
            }
        }
    }

    /// Recover the manifest stored in the last layer of `target`.
    pub async fn discover(&self, target: &ImageReference) -> Result<(RemoteImage, Manifest)> {
        let image = self.registry.resolve(target).await?;
        let last = image.layers().len().checked_sub(1).ok_or_else(|| {
            KontextError::OciImageError(format!("{} has no layers", target))
        })?;

        let tar = uncompressed_layer(self.registry, &image, last).await?;
        let json = read_file(&tar, MANIFEST_PATH)?.ok_or_else(|| {
            KontextError::OciImageError(format!(
                "Last layer of {} has no {}",
                target, MANIFEST_PATH
            ))
        })?;
        let manifest = Manifest::from_json(&json)?;
        Ok((image, manifest))
    }

    async fn clean_slate(&self) -> Result<Baseline> {
        let reference = ImageReference::parse(self.default_base).map_err(|e| {
            KontextError::ConfigError(format!(
                "Invalid default base image '{}': {}",
                self.default_base, e
            ))
        })?;
        let image = self.registry.resolve(&reference).await?;
        Ok(Baseline {
            image,
            manifest: Manifest::new(),
            state: BaseState::CleanSlate,
        })
    }
}
