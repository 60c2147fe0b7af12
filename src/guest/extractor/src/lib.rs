//! Context extractor.
//!
//! Runs as the entrypoint of the default base image. Copies everything under
//! the kontext mount path into the build workspace, recreating directories
//! and preserving mode bits. Symlinks and other irregular entries are
//! skipped with a warning.

use std::fs;
use std::path::{Path, PathBuf};

use kontext_core::error::{KontextError, Result};
use walkdir::WalkDir;

/// Counts reported after an extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
    pub skipped: usize,
}

/// Copy the tree at `source` into `target`.
///
/// Directory modes are applied after their contents are written, so
/// read-only payload directories can still be populated.
pub fn extract(source: &Path, target: &Path) -> Result<ExtractSummary> {
    fs::create_dir_all(target).map_err(|e| KontextError::WalkError {
        path: target.display().to_string(),
        message: format!("Failed to create target: {}", e),
    })?;

    let mut summary = ExtractSummary::default();
    let mut directory_modes: Vec<(PathBuf, fs::Permissions)> = Vec::new();

    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| KontextError::WalkError {
            path: e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| source.display().to_string()),
            message: e.to_string(),
        })?;

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| KontextError::WalkError {
                path: entry.path().display().to_string(),
                message: e.to_string(),
            })?;
        let destination = target.join(relative);
        let metadata = entry.metadata().map_err(|e| KontextError::WalkError {
            path: entry.path().display().to_string(),
            message: e.to_string(),
        })?;

        if metadata.is_dir() {
            tracing::debug!(path = %destination.display(), "Creating directory");
            fs::create_dir_all(&destination)?;
            directory_modes.push((destination, metadata.permissions()));
            summary.directories += 1;
        } else if metadata.is_file() {
            tracing::debug!(path = %destination.display(), "Copying file");
            summary.bytes += copy_file(entry.path(), &destination, metadata.permissions())?;
            summary.files += 1;
        } else {
            tracing::warn!(path = %entry.path().display(), "Skipping irregular file");
            summary.skipped += 1;
        }
    }

    // Deepest first, so a parent turning read-only cannot block a child.
    for (dir, permissions) in directory_modes.into_iter().rev() {
        fs::set_permissions(&dir, permissions)?;
    }

    Ok(summary)
}

fn copy_file(from: &Path, to: &Path, permissions: fs::Permissions) -> Result<u64> {
    let bytes = fs::copy(from, to).map_err(|e| KontextError::WalkError {
        path: from.display().to_string(),
        message: format!("Failed to copy to {}: {}", to.display(), e),
    })?;
    fs::set_permissions(to, permissions)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_copies_tree() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("a/nested")).unwrap();
        fs::write(src.path().join("a/nested/file"), "deep").unwrap();
        fs::write(src.path().join("top"), "top level").unwrap();

        let summary = extract(src.path(), &dst.path().join("workspace")).unwrap();
        assert_eq!(summary.directories, 2);
        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 13);
        assert_eq!(summary.skipped, 0);

        let ws = dst.path().join("workspace");
        assert_eq!(fs::read_to_string(ws.join("a/nested/file")).unwrap(), "deep");
        assert_eq!(fs::read_to_string(ws.join("top")).unwrap(), "top level");
    }

    #[test]
    fn test_extract_empty_source() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let summary = extract(src.path(), dst.path()).unwrap();
        assert_eq!(summary, ExtractSummary::default());
    }

    #[test]
    fn test_missing_source_fails() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let result = extract(&src.path().join("absent"), dst.path());
        assert!(matches!(result, Err(KontextError::WalkError { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_preserves_modes() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir(src.path().join("bin")).unwrap();
        fs::write(src.path().join("bin/tool"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(src.path().join("bin/tool"), fs::Permissions::from_mode(0o555)).unwrap();
        fs::set_permissions(src.path().join("bin"), fs::Permissions::from_mode(0o750)).unwrap();

        extract(src.path(), dst.path()).unwrap();

        let file_mode = fs::metadata(dst.path().join("bin/tool")).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o555);
        let dir_mode = fs::metadata(dst.path().join("bin")).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o750);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("real"), "x").unwrap();
        std::os::unix::fs::symlink(src.path().join("real"), src.path().join("link")).unwrap();

        let summary = extract(src.path(), dst.path()).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.skipped, 1);
        assert!(dst.path().join("real").exists());
        assert!(fs::symlink_metadata(dst.path().join("link")).is_err());
    }
}
