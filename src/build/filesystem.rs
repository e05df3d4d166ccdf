//! File placement inside the target tree.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Resolve a tree-absolute path (`/etc/motd`) below `root`.
pub fn tree_path(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Copy an overlay directory over the tree.
///
/// Editor backups (`*~`) are skipped, symlinks are recreated, permission
/// bits follow the source. Ownership is not copied. Returns the number of
/// files and links placed.
pub fn copy_overlay(overlay: &Path, root: &Path) -> Result<usize> {
    if !overlay.is_dir() {
        anyhow::bail!("Overlay directory {} does not exist", overlay.display());
    }

    let mut placed = 0;
    let walker = WalkDir::new(overlay)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().ends_with('~'));

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", overlay.display()))?;
        let rel = entry.path().strip_prefix(overlay)?;
        let dest = root.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
            let perms = entry.metadata()?.permissions();
            fs::set_permissions(&dest, perms)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            if fs::symlink_metadata(&dest).is_ok() {
                fs::remove_file(&dest)?;
            }
            symlink(&target, &dest)
                .with_context(|| format!("Failed to link {}", dest.display()))?;
            placed += 1;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            // Replace links rather than writing through them.
            if fs::symlink_metadata(&dest).map(|m| m.is_symlink()).unwrap_or(false) {
                fs::remove_file(&dest)?;
            }
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            placed += 1;
        }
    }

    Ok(placed)
}

/// Create `path` in the tree from `source`: a copy if `source` names an
/// existing host file, otherwise the literal text plus a newline.
pub fn add_file(root: &Path, path: &str, source: &str) -> Result<()> {
    let dest = tree_path(root, path);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let host = Path::new(source);
    if host.is_file() {
        fs::copy(host, &dest)
            .with_context(|| format!("Failed to copy {} to {}", source, dest.display()))?;
    } else {
        fs::write(&dest, format!("{}\n", source))
            .with_context(|| format!("Failed to write {}", dest.display()))?;
    }
    Ok(())
}

/// Remove `path` from the tree if present. Directories are removed
/// recursively.
pub fn remove_path(root: &Path, path: &str) -> Result<bool> {
    let target = tree_path(root, path);
    let meta = match fs::symlink_metadata(&target) {
        Ok(meta) => meta,
        Err(_) => return Ok(false),
    };
    if meta.is_dir() {
        fs::remove_dir_all(&target)?;
    } else {
        fs::remove_file(&target)?;
    }
    Ok(true)
}
