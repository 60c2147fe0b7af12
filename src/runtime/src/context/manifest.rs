//! Content-addressed record of a context directory.
//!
//! Maps normalized relative paths to content identities (hex SHA256, or the
//! empty string for directories). One manifest is decoded from the previous
//! image, updated by a single diff pass, and serialized into the manifest
//! layer of the next image.

use std::collections::{BTreeMap, HashSet};
use std::io::Read;

use kontext_core::error::Result;
use serde::{Deserialize, Serialize};

/// Normalized form of the context root.
pub const ROOT: &str = ".";

/// Path → content identity for every entry of a published context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// relative path -> SHA256 (or empty if a directory)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    files: BTreeMap<String, String>,
}

impl Manifest {
    /// Create an empty manifest (the clean-slate baseline).
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the normalized path is recorded.
    pub fn has(&self, path: &str) -> bool {
        self.files.contains_key(&normalize(path))
    }

    /// Recorded identity for the normalized path.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(&normalize(path)).map(String::as_str)
    }

    /// Insert or overwrite the entry for the normalized path.
    pub fn add(&mut self, path: &str, identity: impl Into<String>) {
        self.files.insert(normalize(path), identity.into());
    }

    /// Delete the entry for the normalized path. No-op if absent.
    pub fn remove(&mut self, path: &str) {
        self.files.remove(&normalize(path));
    }

    /// Every recorded path not present in `current`, in ascending order.
    ///
    /// Keys live in a `BTreeMap`, so the result is sorted without depending
    /// on hash iteration order.
    pub fn missing<I, S>(&self, current: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let have: HashSet<String> = current
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .collect();

        self.files
            .keys()
            .filter(|key| key.as_str() != ROOT && !have.contains(key.as_str()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Entries in ascending path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode as the JSON document stored in the manifest layer.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a manifest document, normalizing its keys.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: Manifest = serde_json::from_slice(data)?;
        Ok(raw.normalized())
    }

    /// Decode a manifest document from a stream.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let raw: Manifest = serde_json::from_reader(reader)?;
        Ok(raw.normalized())
    }

    /// Normalize every key. The root is never an entry of its own, so a
    /// recorded `"."` (or a key cleaning to it) is dropped.
    fn normalized(self) -> Self {
        let files = self
            .files
            .into_iter()
            .map(|(k, v)| (normalize(&k), v))
            .filter(|(k, _)| k != ROOT)
            .collect();
        Self { files }
    }
}

/// Lexically clean a relative path: `/`-separated, no empty, `.` or `..`
/// segments, no leading or trailing slash. The root cleans to `"."`.
///
/// `..` never climbs above the root.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        ROOT.to_string()
    } else {
        parts.join("/")
    }
}

/// Parent of a normalized path, or `None` when the parent is the root.
pub fn parent(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// Final segment of a normalized path.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}
