//! Deterministic traversal of a context directory.

use std::path::{Path, PathBuf};

use kontext_core::error::{KontextError, Result};
use walkdir::WalkDir;

use super::hasher::{ContentHasher, DIRECTORY_IDENTITY};

/// A single entry found under the context root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// `/`-separated path relative to the root
    pub path: String,
    /// Location on disk
    pub source: PathBuf,
    /// Whether this is a directory (after following symlinks)
    pub is_dir: bool,
    /// File size in bytes (0 for directories)
    pub size: u64,
}

impl DirectoryEntry {
    /// Content identity of this entry. Files are hashed on demand.
    pub fn identity(&self, hasher: &ContentHasher) -> Result<String> {
        if self.is_dir {
            Ok(DIRECTORY_IDENTITY.to_string())
        } else {
            hasher.file_digest(&self.source)
        }
    }
}

/// Walks a directory depth-first, children sorted by name.
///
/// Symlinks are followed, so a link to a file is reported as that file.
/// The root itself is not reported.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
}

impl TreeWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily yield every entry under the root.
    ///
    /// The first error ends the useful part of the walk; callers collect into
    /// `Result<Vec<_>>` so partial results are discarded.
    pub fn entries(&self) -> impl Iterator<Item = Result<DirectoryEntry>> + '_ {
        WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e
                            .path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| self.root.display().to_string());
                        return Some(Err(KontextError::WalkError {
                            path,
                            message: e.to_string(),
                        }));
                    }
                };

                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        return Some(Err(KontextError::WalkError {
                            path: entry.path().display().to_string(),
                            message: format!("Failed to read metadata: {}", e),
                        }))
                    }
                };

                if !metadata.is_dir() && !metadata.is_file() {
                    tracing::warn!(
                        path = %entry.path().display(),
                        "Skipping irregular file"
                    );
                    return None;
                }

                Some(self.relative_path(entry.path()).map(|path| DirectoryEntry {
                    path,
                    source: entry.path().to_path_buf(),
                    is_dir: metadata.is_dir(),
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                }))
            })
    }

    fn relative_path(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.root).map_err(|e| KontextError::WalkError {
            path: path.display().to_string(),
            message: format!("Failed to compute relative path: {}", e),
        })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            let part = component.as_os_str().to_str().ok_or_else(|| {
                KontextError::WalkError {
                    path: path.display().to_string(),
                    message: "Path is not valid UTF-8".to_string(),
                }
            })?;
            parts.push(part);
        }
        Ok(parts.join("/"))
    }
}
