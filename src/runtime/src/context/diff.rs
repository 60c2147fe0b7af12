//! Incremental diff of a walked context against a baseline manifest.
//!
//! # Process
//!
//! 1. Every walked entry absent from the baseline is included and recorded.
//! 2. Entries already recorded are skipped under [`ChangeDetection::Presence`];
//!    under [`ChangeDetection::Content`] they are rehashed and included again
//!    when the digest differs.
//! 3. Baseline paths absent from the walk are removed from the manifest.
//! 4. A removed path gets a whiteout marker only if its parent is still a
//!    recorded directory; the root always counts as present.

use std::path::PathBuf;

use kontext_core::error::Result;
use kontext_core::ChangeDetection;

use super::hasher::{ContentHasher, DIRECTORY_IDENTITY};
use super::manifest::{parent, Manifest};
use super::walker::DirectoryEntry;

/// Kind of an included entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File { size: u64 },
}

/// An entry that must be written to the data layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    /// Normalized relative path
    pub path: String,
    /// Location on disk to read the body from
    pub source: PathBuf,
    pub kind: EntryKind,
}

impl Inclusion {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }
}

/// Outcome of one diff pass.
#[derive(Debug, Clone)]
pub struct DiffResult {
    /// New or changed entries, in walk order
    pub inclusions: Vec<Inclusion>,
    /// Every baseline path that vanished, ascending
    pub removed: Vec<String>,
    /// Removed paths that get a whiteout marker, ascending
    pub whiteouts: Vec<String>,
    /// Baseline with this pass's additions and removals applied
    pub manifest: Manifest,
}

impl DiffResult {
    /// Number of changed entries: inclusions plus removals.
    pub fn changed(&self) -> usize {
        self.inclusions.len() + self.removed.len()
    }

    /// Whether publishing can be skipped.
    pub fn is_unchanged(&self) -> bool {
        self.changed() == 0
    }
}

/// Compares walked entries against a baseline manifest.
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    hasher: ContentHasher,
    mode: ChangeDetection,
}

impl DiffEngine {
    pub fn new(mode: ChangeDetection) -> Self {
        Self {
            hasher: ContentHasher::new(),
            mode,
        }
    }

    pub fn mode(&self) -> ChangeDetection {
        self.mode
    }

    /// Run one pass. Takes ownership of the baseline and returns the updated
    /// manifest inside the result.
    pub fn diff<I>(&self, entries: I, baseline: Manifest) -> Result<DiffResult>
    where
        I: IntoIterator<Item = Result<DirectoryEntry>>,
    {
        let mut manifest = baseline;
        let mut seen = Vec::new();
        let mut inclusions = Vec::new();

        for entry in entries {
            let entry = entry?;
            seen.push(entry.path.clone());

            let recorded = manifest.get(&entry.path).map(str::to_owned);
            let identity = match (recorded, self.mode) {
                (Some(_), ChangeDetection::Presence) => {
                    tracing::debug!(path = %entry.path, "Unchanged (already published)");
                    continue;
                }
                (Some(previous), ChangeDetection::Content) => {
                    let identity = entry.identity(&self.hasher)?;
                    if identity == previous {
                        tracing::debug!(path = %entry.path, "Unchanged (digest matches)");
                        continue;
                    }
                    tracing::debug!(path = %entry.path, "Changed");
                    identity
                }
                (None, _) => {
                    tracing::debug!(path = %entry.path, "Added");
                    entry.identity(&self.hasher)?
                }
            };

            manifest.add(&entry.path, identity);
            inclusions.push(Inclusion {
                kind: if entry.is_dir {
                    EntryKind::Directory
                } else {
                    EntryKind::File { size: entry.size }
                },
                path: entry.path,
                source: entry.source,
            });
        }

        let removed = manifest.missing(&seen);
        for path in &removed {
            manifest.remove(path);
        }

        let mut whiteouts = Vec::new();
        for path in &removed {
            let parent_present = match parent(path) {
                None => true,
                Some(dir) => manifest.get(dir) == Some(DIRECTORY_IDENTITY),
            };
            if parent_present {
                tracing::debug!(path = %path, "Removed (whiteout)");
                whiteouts.push(path.clone());
            } else {
                tracing::debug!(path = %path, "Removed (covered by parent)");
            }
        }

        Ok(DiffResult {
            inclusions,
            removed,
            whiteouts,
            manifest,
        })
    }
}
