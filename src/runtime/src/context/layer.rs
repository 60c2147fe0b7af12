//! Layer synthesis for a diff pass.
//!
//! Produces two uncompressed tar archives: the data layer (changed entries
//! under the mount path plus whiteout markers) and the manifest layer (the
//! updated manifest at its well-known path). Headers carry fixed mode bits,
//! zero timestamps and zero ownership so identical inputs give identical bytes.

use std::fs::File;
use std::io::Read;

use kontext_core::error::{KontextError, Result};
use kontext_core::{MANIFEST_PATH, MOUNT_PATH};
use tar::{Builder, EntryType, Header};

use super::diff::{DiffResult, EntryKind, Inclusion};
use super::hasher::HashingReader;
use super::manifest::{base_name, parent, Manifest};

/// Mode for every directory and file entry. Independent of the local umask.
pub const ENTRY_MODE: u32 = 0o555;

/// Mode for whiteout markers.
pub const WHITEOUT_MODE: u32 = 0o000;

/// Base-name prefix marking a removed path when layers are merged.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// The two archives produced for one incremental round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedLayers {
    /// Changed files, directories and whiteout markers
    pub data: Vec<u8>,
    /// The updated manifest
    pub manifest: Vec<u8>,
}

/// Serializes a [`DiffResult`] into layer archives.
#[derive(Debug, Clone)]
pub struct LayerSynthesizer {
    mount_root: String,
    manifest_path: String,
}

impl Default for LayerSynthesizer {
    fn default() -> Self {
        Self::new(MOUNT_PATH, MANIFEST_PATH)
    }
}

impl LayerSynthesizer {
    /// Create a synthesizer writing payload under `mount_path` and the
    /// manifest at `manifest_path`. Archive names are stored relative.
    pub fn new(mount_path: &str, manifest_path: &str) -> Self {
        Self {
            mount_root: mount_path.trim_matches('/').to_string(),
            manifest_path: manifest_path.trim_start_matches('/').to_string(),
        }
    }

    /// Build both archives.
    pub fn synthesize(&self, diff: &DiffResult) -> Result<SynthesizedLayers> {
        Ok(SynthesizedLayers {
            data: self.data_layer(diff)?,
            manifest: self.manifest_layer(&diff.manifest)?,
        })
    }

    /// Build the data layer: inclusions in walk order, then whiteouts.
    pub fn data_layer(&self, diff: &DiffResult) -> Result<Vec<u8>> {
        let mut builder = Builder::new(Vec::new());

        for inclusion in &diff.inclusions {
            let name = self.payload_path(&inclusion.path);
            match inclusion.kind {
                EntryKind::Directory => {
                    let mut header = fixed_header(EntryType::Directory, 0, ENTRY_MODE);
                    builder
                        .append_data(&mut header, &name, std::io::empty())
                        .map_err(|e| {
                            KontextError::LayerError(format!(
                                "Failed to add directory {} to layer: {}",
                                inclusion.path, e
                            ))
                        })?;
                }
                EntryKind::File { .. } => {
                    let file = File::open(&inclusion.source).map_err(|e| {
                        KontextError::LayerError(format!(
                            "Failed to open {}: {}",
                            inclusion.source.display(),
                            e
                        ))
                    })?;
                    let size = file.metadata()?.len();
                    let mut header = fixed_header(EntryType::Regular, size, ENTRY_MODE);
                    let mut body = HashingReader::new(file.take(size));
                    builder
                        .append_data(&mut header, &name, &mut body)
                        .map_err(|e| {
                            KontextError::LayerError(format!(
                                "Failed to add file {} to layer: {}",
                                inclusion.path, e
                            ))
                        })?;
                    check_body(inclusion, &diff.manifest, size, body.finish())?;
                }
            }
        }

        for removed in &diff.whiteouts {
            let name = self.payload_path(&whiteout_path(removed));
            let mut header = fixed_header(EntryType::Regular, 0, WHITEOUT_MODE);
            builder
                .append_data(&mut header, &name, std::io::empty())
                .map_err(|e| {
                    KontextError::LayerError(format!(
                        "Failed to add whiteout for {} to layer: {}",
                        removed, e
                    ))
                })?;
        }

        builder
            .into_inner()
            .map_err(|e| KontextError::LayerError(format!("Failed to finalize layer: {}", e)))
    }

    /// Build the manifest layer: a single JSON entry at the manifest path.
    pub fn manifest_layer(&self, manifest: &Manifest) -> Result<Vec<u8>> {
        let json = manifest.to_json()?;
        let mut builder = Builder::new(Vec::new());
        let mut header = fixed_header(EntryType::Regular, json.len() as u64, ENTRY_MODE);
        builder
            .append_data(&mut header, &self.manifest_path, json.as_slice())
            .map_err(|e| {
                KontextError::LayerError(format!("Failed to add manifest to layer: {}", e))
            })?;
        builder.into_inner().map_err(|e| {
            KontextError::LayerError(format!("Failed to finalize manifest layer: {}", e))
        })
    }

    fn payload_path(&self, relative: &str) -> String {
        format!("{}/{}", self.mount_root, relative)
    }
}

/// Marker path for a removed entry: same directory, prefixed base name.
pub fn whiteout_path(path: &str) -> String {
    let marker = format!("{}{}", WHITEOUT_PREFIX, base_name(path));
    match parent(path) {
        Some(dir) => format!("{}/{}", dir, marker),
        None => marker,
    }
}

/// The archived body must be the whole file and must match the identity
/// recorded when the diff hashed it.
fn check_body(
    inclusion: &Inclusion,
    manifest: &Manifest,
    size: u64,
    (copied, digest): (u64, String),
) -> Result<()> {
    if copied != size {
        return Err(KontextError::LayerError(format!(
            "{} changed while archiving: expected {} bytes, read {}",
            inclusion.source.display(),
            size,
            copied
        )));
    }
    match manifest.get(&inclusion.path) {
        Some(recorded) if recorded != digest => Err(KontextError::LayerError(format!(
            "{} changed after it was hashed: recorded {}, archived {}",
            inclusion.source.display(),
            recorded,
            digest
        ))),
        _ => Ok(()),
    }
}

fn fixed_header(entry_type: EntryType, size: u64, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::diff::DiffEngine;
    use crate::context::walker::TreeWalker;
    use kontext_core::ChangeDetection;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// (name, entry type, mode, body)
    fn read_entries(data: &[u8]) -> Vec<(String, EntryType, u32, Vec<u8>)> {
        let mut archive = tar::Archive::new(data);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().to_string();
                let kind = e.header().entry_type();
                let mode = e.header().mode().unwrap();
                let mut body = Vec::new();
                e.read_to_end(&mut body).unwrap();
                (name, kind, mode, body)
            })
            .collect()
    }

    fn diff_dir(root: &Path, baseline: Manifest) -> DiffResult {
        DiffEngine::new(ChangeDetection::Presence)
            .diff(TreeWalker::new(root).entries(), baseline)
            .unwrap()
    }

    #[test]
    fn test_data_layer_entries() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("a/b"), "hello").unwrap();

        let diff = diff_dir(tmp.path(), Manifest::new());
        let data = LayerSynthesizer::default().data_layer(&diff).unwrap();
        let entries = read_entries(&data);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "var/run/kontext/a");
        assert_eq!(entries[0].1, EntryType::Directory);
        assert_eq!(entries[0].2, ENTRY_MODE);
        assert_eq!(entries[1].0, "var/run/kontext/a/b");
        assert_eq!(entries[1].1, EntryType::Regular);
        assert_eq!(entries[1].3, b"hello");
    }

    #[test]
    fn test_whiteout_entries() {
        let diff = DiffResult {
            inclusions: Vec::new(),
            removed: vec!["dir/file".to_string(), "top".to_string()],
            whiteouts: vec!["dir/file".to_string(), "top".to_string()],
            manifest: Manifest::new(),
        };
        let data = LayerSynthesizer::default().data_layer(&diff).unwrap();
        let entries = read_entries(&data);

        let names: Vec<&str> = entries.iter().map(|e| e.0.as_str()).collect();
        assert_eq!(
            names,
            vec!["var/run/kontext/dir/.wh.file", "var/run/kontext/.wh.top"]
        );
        assert!(entries.iter().all(|e| e.3.is_empty()));
        assert!(entries.iter().all(|e| e.1 == EntryType::Regular));
    }

    #[test]
    fn test_manifest_layer() {
        let mut m = Manifest::new();
        m.add("a", "");
        m.add("a/b", "d1");

        let data = LayerSynthesizer::default().manifest_layer(&m).unwrap();
        let entries = read_entries(&data);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "var/lib/kontext/manifest.json");
        assert_eq!(Manifest::from_json(&entries[0].3).unwrap(), m);
    }

    #[test]
    fn test_layers_are_deterministic() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("dir")).unwrap();
        fs::write(tmp.path().join("dir/one"), "1").unwrap();
        fs::write(tmp.path().join("two"), "2").unwrap();

        let synth = LayerSynthesizer::default();
        let first = synth.synthesize(&diff_dir(tmp.path(), Manifest::new())).unwrap();

        // Touch the tree without changing content
        fs::write(tmp.path().join("two"), "2").unwrap();
        let second = synth.synthesize(&diff_dir(tmp.path(), Manifest::new())).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_headers_have_no_timestamps_or_owner() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), "x").unwrap();

        let data = LayerSynthesizer::default()
            .data_layer(&diff_dir(tmp.path(), Manifest::new()))
            .unwrap();
        let mut archive = tar::Archive::new(data.as_slice());
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            assert_eq!(entry.header().mtime().unwrap(), 0);
            assert_eq!(entry.header().uid().unwrap(), 0);
            assert_eq!(entry.header().gid().unwrap(), 0);
        }
    }

    #[test]
    fn test_long_paths_survive() {
        let long = "d".repeat(120);
        let diff = DiffResult {
            inclusions: vec![Inclusion {
                path: long.clone(),
                source: PathBuf::from("/nonexistent"),
                kind: EntryKind::Directory,
            }],
            removed: Vec::new(),
            whiteouts: Vec::new(),
            manifest: Manifest::new(),
        };
        let data = LayerSynthesizer::default().data_layer(&diff).unwrap();
        let entries = read_entries(&data);
        assert_eq!(entries[0].0, format!("var/run/kontext/{}", long));
    }

    #[test]
    fn test_vanished_source_fails() {
        let diff = DiffResult {
            inclusions: vec![Inclusion {
                path: "gone".to_string(),
                source: PathBuf::from("/definitely/not/here"),
                kind: EntryKind::File { size: 1 },
            }],
            removed: Vec::new(),
            whiteouts: Vec::new(),
            manifest: Manifest::new(),
        };
        let err = LayerSynthesizer::default().data_layer(&diff).unwrap_err();
        assert!(matches!(err, KontextError::LayerError(_)));
    }

    #[test]
    fn test_file_changed_after_diff_fails() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("f"), "before").unwrap();
        let diff = diff_dir(tmp.path(), Manifest::new());

        fs::write(tmp.path().join("f"), "after!").unwrap();
        let err = LayerSynthesizer::default().data_layer(&diff).unwrap_err();
        assert!(matches!(err, KontextError::LayerError(_)));
    }

    #[test]
    fn test_short_body_is_rejected() {
        let inclusion = Inclusion {
            path: "f".to_string(),
            source: PathBuf::from("f"),
            kind: EntryKind::File { size: 4 },
        };
        let err = check_body(&inclusion, &Manifest::new(), 4, (2, "d".to_string())).unwrap_err();
        assert!(matches!(err, KontextError::LayerError(_)));
        assert!(check_body(&inclusion, &Manifest::new(), 4, (4, "d".to_string())).is_ok());
    }

    #[test]
    fn test_whiteout_path() {
        assert_eq!(whiteout_path("top"), ".wh.top");
        assert_eq!(whiteout_path("a/b/c"), "a/b/.wh.c");
    }

    #[test]
    fn test_custom_layout() {
        let synth = LayerSynthesizer::new("/mnt/ctx/", "/etc/ctx.json");
        let data = synth.manifest_layer(&Manifest::new()).unwrap();
        assert_eq!(read_entries(&data)[0].0, "etc/ctx.json");
    }
}
