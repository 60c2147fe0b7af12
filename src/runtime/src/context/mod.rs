//! Incremental context engine.
//!
//! Turns a local directory plus the manifest of the previously published
//! image into a minimal delta:
//!
//! ```text
//!   TreeWalker ──entries──▶ DiffEngine ◀──baseline── Manifest
//!                               │
//!                          DiffResult
//!                               │
//!                       LayerSynthesizer
//!                        │            │
//!                   data layer   manifest layer
//! ```

pub mod diff;
pub mod hasher;
pub mod layer;
pub mod manifest;
pub mod walker;

pub use diff::{DiffEngine, DiffResult, EntryKind, Inclusion};
pub use hasher::{ContentHasher, DIRECTORY_IDENTITY};
pub use layer::{whiteout_path, LayerSynthesizer, SynthesizedLayers, WHITEOUT_PREFIX};
pub use manifest::Manifest;
pub use walker::{DirectoryEntry, TreeWalker};
