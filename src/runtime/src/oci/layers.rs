//! Layer decoding helpers.

use std::io::Read;

use flate2::read::GzDecoder;
use kontext_core::error::{KontextError, Result};
use tar::Archive;

use super::image::RemoteImage;
use super::registry::ImageRegistry;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decompress a layer blob into its tar stream.
///
/// Gzip is detected from the media type or the stream header; plain tar
/// passes through. Other compressions are rejected.
pub fn decompress(blob: &[u8], media_type: &str) -> Result<Vec<u8>> {
    if media_type.ends_with("zstd") {
        return Err(KontextError::LayerError(format!(
            "Unsupported layer compression: {}",
            media_type
        )));
    }

    if media_type.ends_with("gzip") || blob.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(blob)
            .read_to_end(&mut out)
            .map_err(|e| KontextError::LayerError(format!("Failed to decompress layer: {}", e)))?;
        return Ok(out);
    }

    Ok(blob.to_vec())
}

/// Fetch layer `index` of `image` and return it uncompressed.
pub async fn uncompressed_layer(
    registry: &dyn ImageRegistry,
    image: &RemoteImage,
    index: usize,
) -> Result<Vec<u8>> {
    let blob = registry.layer_blob(image, index).await?;
    let media_type = image
        .layers()
        .get(index)
        .map(|l| l.media_type.as_str())
        .unwrap_or_default();
    decompress(&blob, media_type)
}

/// Body of the regular file at `path` inside a tar stream, if present.
///
/// Entry names are compared without leading `/` or `./`.
pub fn read_file(tar: &[u8], path: &str) -> Result<Option<Vec<u8>>> {
    let wanted = strip_root(path);
    let mut archive = Archive::new(tar);
    let entries = archive
        .entries()
        .map_err(|e| KontextError::LayerError(format!("Failed to read layer: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| KontextError::LayerError(format!("Corrupt layer entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| KontextError::LayerError(format!("Invalid entry path: {}", e)))?
            .to_string_lossy()
            .into_owned();
        if strip_root(&name) != wanted {
            continue;
        }

        let mut body = Vec::new();
        entry
            .read_to_end(&mut body)
            .map_err(|e| KontextError::LayerError(format!("Failed to read {}: {}", name, e)))?;
        return Ok(Some(body));
    }

    Ok(None)
}

fn strip_root(name: &str) -> &str {
    let mut name = name;
    loop {
        if let Some(rest) = name.strip_prefix("./") {
            name = rest;
        } else if let Some(rest) = name.strip_prefix('/') {
            name = rest;
        } else {
            return name;
        }
    }
}
