//! In-memory registry.
//!
//! Keeps manifests and a content-addressed blob pool in process memory.
//! Uploads are checked against their digest, and a manifest is only
//! accepted once every blob it names is present. Used by tests and dry runs
//! of the publish pipeline.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use kontext_core::error::{KontextError, Result};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use tokio::sync::Mutex;

use super::image::RemoteImage;
use super::reference::ImageReference;
use super::registry::ImageRegistry;
use crate::context::hasher::sha256_bytes;

#[derive(Debug, Clone)]
struct StoredImage {
    manifest: OciImageManifest,
    config: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    images: HashMap<String, StoredImage>,
    blobs: HashMap<String, Vec<u8>>,
    unreachable: HashSet<String>,
    uploads: Vec<String>,
    mounts: usize,
    pushes: usize,
}

/// Registry double keeping everything in memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an image under `reference` without counting any upload or push.
    /// `blobs` supplies layer bodies the image does not hold itself.
    pub async fn insert(
        &self,
        reference: &ImageReference,
        image: &RemoteImage,
        blobs: Vec<Vec<u8>>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        for blob in blobs {
            state.blobs.insert(digest_of(&blob), blob);
        }
        for layer in image.layers() {
            if let Some(blob) = image.local_blob(&layer.digest) {
                state.blobs.insert(layer.digest.clone(), blob.to_vec());
            }
        }
        state
            .blobs
            .insert(digest_of(image.config_bytes()), image.config_bytes().to_vec());
        store_manifest(&mut state, reference, image.manifest())
    }

    /// Make every operation on `reference` fail with a registry error.
    pub async fn set_unreachable(&self, reference: &ImageReference) {
        self.state
            .lock()
            .await
            .unreachable
            .insert(reference.full_reference());
    }

    /// Number of manifests written.
    pub async fn push_count(&self) -> usize {
        self.state.lock().await.pushes
    }

    /// Digests of every uploaded blob, in upload order.
    pub async fn uploads(&self) -> Vec<String> {
        self.state.lock().await.uploads.clone()
    }

    /// Number of blobs linked by mount instead of upload.
    pub async fn mount_count(&self) -> usize {
        self.state.lock().await.mounts
    }

    /// Whether an image is tagged as `reference`.
    pub async fn contains(&self, reference: &ImageReference) -> bool {
        self.state
            .lock()
            .await
            .images
            .contains_key(&reference.full_reference())
    }
}

fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", sha256_bytes(data))
}

fn check_reachable(state: &State, reference: &ImageReference) -> Result<()> {
    if state.unreachable.contains(&reference.full_reference()) {
        return Err(KontextError::RegistryError {
            registry: reference.registry.clone(),
            message: format!("{} is unreachable", reference),
        });
    }
    Ok(())
}

fn unknown_blob(reference: &ImageReference, digest: &str) -> KontextError {
    KontextError::RegistryError {
        registry: reference.registry.clone(),
        message: format!("blob unknown: {}", digest),
    }
}

/// Record `manifest` under `reference` once every blob it names is present.
fn store_manifest(
    state: &mut State,
    reference: &ImageReference,
    manifest: &OciImageManifest,
) -> Result<()> {
    for layer in &manifest.layers {
        let blob = state
            .blobs
            .get(&layer.digest)
            .ok_or_else(|| unknown_blob(reference, &layer.digest))?;
        verify(reference, layer, blob)?;
    }

    let config = state
        .blobs
        .get(&manifest.config.digest)
        .ok_or_else(|| unknown_blob(reference, &manifest.config.digest))?;
    verify(reference, &manifest.config, config)?;

    let stored = StoredImage {
        manifest: manifest.clone(),
        config: config.clone(),
    };
    state.images.insert(reference.full_reference(), stored);
    Ok(())
}

fn verify(reference: &ImageReference, descriptor: &OciDescriptor, blob: &[u8]) -> Result<()> {
    let actual = digest_of(blob);
    if actual != descriptor.digest || blob.len() as i64 != descriptor.size {
        return Err(KontextError::RegistryError {
            registry: reference.registry.clone(),
            message: format!(
                "Blob does not match descriptor {} ({} bytes): got {} ({} bytes)",
                descriptor.digest,
                descriptor.size,
                actual,
                blob.len()
            ),
        });
    }
    Ok(())
}

#[async_trait]
impl ImageRegistry for MemoryRegistry {
    async fn resolve(&self, reference: &ImageReference) -> Result<RemoteImage> {
        let state = self.state.lock().await;
        check_reachable(&state, reference)?;
        let stored = state
            .images
            .get(&reference.full_reference())
            .ok_or_else(|| KontextError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("manifest unknown: {}", reference),
            })?;
        Ok(RemoteImage::new(
            Some(reference.clone()),
            stored.manifest.clone(),
            stored.config.clone(),
        ))
    }

    async fn blob(&self, reference: &ImageReference, descriptor: &OciDescriptor) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        check_reachable(&state, reference)?;
        state
            .blobs
            .get(&descriptor.digest)
            .cloned()
            .ok_or_else(|| unknown_blob(reference, &descriptor.digest))
    }

    async fn upload_blob(&self, target: &ImageReference, data: &[u8], digest: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        check_reachable(&state, target)?;
        let actual = digest_of(data);
        if actual != digest {
            return Err(KontextError::RegistryError {
                registry: target.registry.clone(),
                message: format!("Upload digest mismatch: declared {}, content is {}", digest, actual),
            });
        }
        state.blobs.insert(actual, data.to_vec());
        state.uploads.push(digest.to_string());
        Ok(format!(
            "memory://{}/{}/blobs/{}",
            target.registry, target.repository, digest
        ))
    }

    async fn mount_blob(
        &self,
        target: &ImageReference,
        source: &ImageReference,
        digest: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        check_reachable(&state, target)?;
        check_reachable(&state, source)?;
        if !state.blobs.contains_key(digest) {
            return Err(unknown_blob(source, digest));
        }
        state.mounts += 1;
        Ok(())
    }

    async fn put_manifest(&self, target: &ImageReference, manifest: &OciImageManifest) -> Result<String> {
        let mut state = self.state.lock().await;
        check_reachable(&state, target)?;
        store_manifest(&mut state, target, manifest)?;
        state.pushes += 1;

        tracing::debug!(reference = %target, layers = manifest.layers.len(), "Stored manifest in memory");
        Ok(format!("memory://{}", target.full_reference()))
    }
}
