//! Stateless filesystem helpers shared by workspace staging and the archive
//! codec.
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// How symbolic links found under the source tree are copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symlinks {
    /// Recreate the link itself at the destination.
    Preserve,
    /// Copy whatever the link points at.
    Follow,
}

/// Recursively copy the contents of `source` into `dest`, merging with any
/// existing content (files already at the destination are overwritten).
///
/// Returns the destination paths of every file and link written.
pub fn copy_tree(source: &Path, dest: &Path, symlinks: Symlinks) -> Result<Vec<PathBuf>> {
    if !source.is_dir() {
        return Err(anyhow!("cannot copy tree: {} is not a directory", source.display()));
    }
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    let mut written = Vec::new();
    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(symlinks == Symlinks::Follow)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", source.display()))?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .context("strip source prefix")?;
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path())
                .with_context(|| format!("read link {}", entry.path().display()))?;
            replace_with_symlink(&link_target, &target)?;
            written.push(target);
        } else {
            if target.is_symlink() || target.is_dir() {
                remove_path(&target)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} to {}", entry.path().display(), target.display())
            })?;
            written.push(target);
        }
    }
    Ok(written)
}

/// Remove `path` whether it is a file, a link, or a directory tree.
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("stat {}", path.display())),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))?;
    } else {
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}

/// List every file (and link) below `root`, sorted, as paths relative to it.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).context("strip root prefix")?;
        files.push(rel.to_path_buf());
    }
    Ok(files)
}

fn replace_with_symlink(link_target: &Path, path: &Path) -> Result<()> {
    remove_path(path)?;
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(link_target, path)
            .with_context(|| format!("create symlink {}", path.display()))?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = link_target;
        Err(anyhow!(
            "cannot preserve symlink {}: unsupported on this platform",
            path.display()
        ))
    }
}
