//! Versioned tar.gz snapshots of a workspace, used to hand a planned
//! workspace from one pipeline stage to the next.
use crate::error::{require_path, TfError};
use crate::fsutil::{copy_tree, Symlinks};
use crate::workspace::WORKSPACE_DIR_NAME;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ARCHIVE_PREFIX: &str = "terraform";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// `<timestamp>` or `<timestamp>.<source_ref>`.
pub fn derive_version(timestamp: u64, source_ref: Option<&str>) -> String {
    match source_ref.filter(|source_ref| !source_ref.is_empty()) {
        Some(source_ref) => format!("{timestamp}.{source_ref}"),
        None => timestamp.to_string(),
    }
}

/// Work out the archive version from a direct ref, a ref file, and an
/// optional fixed timestamp (defaults to now).
///
/// A direct ref wins over the file.
pub fn archive_version(
    source_ref: Option<&str>,
    source_ref_file: Option<&Path>,
    timestamp: Option<u64>,
) -> Result<String> {
    let timestamp = match timestamp {
        Some(timestamp) => timestamp,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the unix epoch")?
            .as_secs(),
    };
    let source_ref = source_ref.filter(|source_ref| !source_ref.is_empty());
    let from_file = match (source_ref, source_ref_file) {
        (None, Some(path)) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("read source ref file {}", path.display()))?;
            Some(text.trim_end_matches(['\n', '\r']).to_string())
        }
        _ => None,
    };
    Ok(derive_version(timestamp, source_ref.or(from_file.as_deref())))
}

pub fn archive_file_name(version: &str) -> String {
    format!("{ARCHIVE_PREFIX}-{version}{ARCHIVE_SUFFIX}")
}

/// Pack `workspace_dir` under a single `terraform/` entry into
/// `output_dir/terraform-<version>.tar.gz`. Links are stored as links.
///
/// The archive only appears under its final name once fully written.
pub fn create(
    workspace_dir: &Path,
    output_dir: &Path,
    version: &str,
    debug: bool,
) -> Result<PathBuf> {
    require_path(workspace_dir, "terraform_dir")?;
    require_path(output_dir, "archive_output_dir")?;
    if !workspace_dir.is_dir() {
        return Err(TfError::NotFound {
            what: "workspace",
            path: workspace_dir.to_path_buf(),
        }
        .into());
    }
    fs::create_dir_all(output_dir).with_context(|| format!("create {}", output_dir.display()))?;

    let path = output_dir.join(archive_file_name(version));
    let mut partial = tempfile::Builder::new()
        .prefix(".terraform-")
        .suffix(".partial")
        .tempfile_in(output_dir)
        .with_context(|| format!("create scratch archive in {}", output_dir.display()))?;
    let encoder = GzEncoder::new(partial.as_file_mut(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(WORKSPACE_DIR_NAME, workspace_dir)
        .with_context(|| format!("add {} to archive", workspace_dir.display()))?;
    let encoder = builder.into_inner().context("finish tar archive")?;
    encoder.finish().context("finish gzip compression")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        partial
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .context("set archive permissions")?;
    }
    partial
        .persist_noclobber(&path)
        .with_context(|| format!("create archive {}", path.display()))?;
    tracing::info!(version, "created archive {}", path.display());

    if debug {
        for entry in list_entries(&path)? {
            tracing::debug!(archive = %path.display(), "{entry}");
        }
    }
    Ok(path)
}

/// Entry paths stored in an archive, in archive order.
pub fn list_entries(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("open archive {}", path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut names = Vec::new();
    for entry in archive
        .entries()
        .with_context(|| format!("read archive {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("read entry in {}", path.display()))?;
        let name = entry.path().context("decode entry path")?;
        names.push(name.display().to_string());
    }
    Ok(names)
}

/// The single archive in `input_dir`.
pub fn find_archive(input_dir: &Path) -> Result<PathBuf> {
    require_path(input_dir, "archive_input_dir")?;
    let entries =
        fs::read_dir(input_dir).with_context(|| format!("read {}", input_dir.display()))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", input_dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(ARCHIVE_SUFFIX) && entry.path().is_file() {
            names.push(name);
        }
    }
    names.sort();
    match names.len() {
        0 => Err(TfError::NoArchive {
            dir: input_dir.to_path_buf(),
        }
        .into()),
        1 => Ok(input_dir.join(&names[0])),
        _ => Err(TfError::MultipleArchives {
            dir: input_dir.to_path_buf(),
            files: names,
        }
        .into()),
    }
}

/// Unpack the single archive in `input_dir` and copy its workspace tree into
/// `workspace_dir`. Returns the archive that was restored.
pub fn restore(input_dir: &Path, workspace_dir: &Path) -> Result<PathBuf> {
    require_path(input_dir, "archive_input_dir")?;
    require_path(workspace_dir, "terraform_dir")?;
    let path = find_archive(input_dir)?;
    tracing::info!("extracting archive {}", path.display());

    let scratch = tempfile::tempdir().context("create extraction dir")?;
    let file = File::open(&path).with_context(|| format!("open archive {}", path.display()))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(scratch.path())
        .with_context(|| format!("extract archive {}", path.display()))?;

    let extracted = scratch.path().join(WORKSPACE_DIR_NAME);
    if !extracted.is_dir() {
        return Err(TfError::NotFound {
            what: "workspace entry in archive",
            path,
        }
        .into());
    }
    let copied = copy_tree(&extracted, workspace_dir, Symlinks::Preserve)?;
    tracing::debug!(files = copied.len(), "restored workspace {}", workspace_dir.display());
    Ok(path)
}
