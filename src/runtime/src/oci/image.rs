//! In-memory view of a registry image.
//!
//! A [`RemoteImage`] carries the manifest and raw config of an image plus any
//! layer blobs held locally. Base layers stay in the registry and are fetched
//! through the [`ImageRegistry`](super::registry::ImageRegistry) on demand.

use std::collections::HashMap;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use kontext_core::error::{KontextError, Result};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use serde_json::{json, Value};

use super::reference::ImageReference;
use crate::context::hasher::sha256_bytes;

/// Docker schema 2 manifest media type.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker gzip layer media type.
pub const DOCKER_LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// OCI gzip layer media type.
pub const OCI_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Record of one appended layer in the image history.
#[derive(Debug, Clone)]
pub struct LayerHistory {
    pub created_by: String,
    pub comment: Option<String>,
}

impl LayerHistory {
    pub fn new(created_by: impl Into<String>) -> Self {
        Self {
            created_by: created_by.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    fn to_json(&self) -> Value {
        let mut entry = json!({ "created_by": self.created_by });
        if let Some(ref comment) = self.comment {
            entry["comment"] = json!(comment);
        }
        entry
    }
}

/// An uncompressed layer tarball to append, with its history entry.
#[derive(Debug, Clone)]
pub struct NewLayer {
    pub tar: Vec<u8>,
    pub history: LayerHistory,
}

/// Image manifest, config and locally held blobs.
#[derive(Debug, Clone)]
pub struct RemoteImage {
    source: Option<ImageReference>,
    manifest: OciImageManifest,
    config: Vec<u8>,
    blobs: HashMap<String, Vec<u8>>,
}

impl RemoteImage {
    /// Wrap a manifest and config fetched from `source`.
    pub fn new(source: Option<ImageReference>, manifest: OciImageManifest, config: Vec<u8>) -> Self {
        Self {
            source,
            manifest,
            config,
            blobs: HashMap::new(),
        }
    }

    /// Reference this image was resolved from, if any. Layers not held
    /// locally are fetched from here.
    pub fn source(&self) -> Option<&ImageReference> {
        self.source.as_ref()
    }

    pub fn manifest(&self) -> &OciImageManifest {
        &self.manifest
    }

    /// Raw config bytes, exactly as digested.
    pub fn config_bytes(&self) -> &[u8] {
        &self.config
    }

    /// Parsed config JSON.
    pub fn config_json(&self) -> Result<Value> {
        serde_json::from_slice(&self.config).map_err(|e| {
            KontextError::OciImageError(format!("Failed to parse image config: {}", e))
        })
    }

    /// Layer descriptors, bottom to top.
    pub fn layers(&self) -> &[OciDescriptor] {
        &self.manifest.layers
    }

    /// Layer digests, bottom to top.
    pub fn layer_digests(&self) -> Vec<&str> {
        self.manifest.layers.iter().map(|l| l.digest.as_str()).collect()
    }

    /// Blob for `digest` if it is held in memory.
    pub fn local_blob(&self, digest: &str) -> Option<&[u8]> {
        self.blobs.get(digest).map(Vec::as_slice)
    }

    /// Whether the manifest uses the Docker schema 2 media types.
    pub fn is_docker_format(&self) -> bool {
        self.manifest.media_type.as_deref() == Some(DOCKER_MANIFEST_MEDIA_TYPE)
            || self
                .manifest
                .layers
                .first()
                .map_or(false, |l| l.media_type.starts_with("application/vnd.docker."))
    }

    /// Return a new image with `layers` stacked on top, in order.
    ///
    /// Each tarball is gzip-compressed with a fixed header so equal input
    /// produces equal digests. The config gains one diff-id and history entry
    /// per layer and the manifest points at the rewritten config.
    pub fn append_layers(&self, layers: Vec<NewLayer>) -> Result<RemoteImage> {
        let mut config = self.config_json()?;
        let config_obj = config.as_object_mut().ok_or_else(|| {
            KontextError::OciImageError("Image config is not a JSON object".to_string())
        })?;

        let had_history = config_obj.contains_key("history");
        let base_layers = self.manifest.layers.len();

        let rootfs = config_obj
            .entry("rootfs")
            .or_insert_with(|| json!({ "type": "layers", "diff_ids": [] }));
        if !rootfs.is_object() {
            *rootfs = json!({ "type": "layers", "diff_ids": [] });
        }
        if rootfs.get("diff_ids").and_then(Value::as_array).is_none() {
            rootfs["diff_ids"] = json!([]);
        }

        let media_type = if self.is_docker_format() {
            DOCKER_LAYER_MEDIA_TYPE
        } else {
            OCI_LAYER_MEDIA_TYPE
        };

        let mut manifest = self.manifest.clone();
        let mut blobs = self.blobs.clone();
        let mut diff_ids = Vec::with_capacity(layers.len());
        let mut history = Vec::with_capacity(layers.len());

        for layer in layers {
            let diff_id = format!("sha256:{}", sha256_bytes(&layer.tar));
            let compressed = gzip(&layer.tar)?;
            let digest = format!("sha256:{}", sha256_bytes(&compressed));

            tracing::debug!(
                digest = %digest,
                diff_id = %diff_id,
                size = compressed.len(),
                "Appending layer"
            );

            manifest.layers.push(OciDescriptor {
                media_type: media_type.to_string(),
                digest: digest.clone(),
                size: compressed.len() as i64,
                ..Default::default()
            });
            blobs.insert(digest, compressed);
            diff_ids.push(json!(diff_id));
            history.push(layer.history.to_json());
        }

        if let Some(ids) = config["rootfs"]["diff_ids"].as_array_mut() {
            ids.extend(diff_ids);
        }

        // A config without history only stays consistent if it had no layers.
        if had_history || base_layers == 0 {
            match config.get_mut("history").and_then(Value::as_array_mut) {
                Some(entries) => entries.extend(history),
                None => config["history"] = Value::Array(history),
            }
        }

        let config_bytes = serde_json::to_vec(&config)?;
        manifest.config.digest = format!("sha256:{}", sha256_bytes(&config_bytes));
        manifest.config.size = config_bytes.len() as i64;

        Ok(RemoteImage {
            source: self.source.clone(),
            manifest,
            config: config_bytes,
            blobs,
        })
    }
}

/// Gzip with a zeroed header timestamp and no file name.
fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| KontextError::LayerError(format!("Failed to compress layer: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| KontextError::LayerError(format!("Failed to compress layer: {}", e)))
}
