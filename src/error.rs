//! Error taxonomy for workspace staging and tool invocation.
//!
//! Library code returns `anyhow::Result` like the rest of the crate; the
//! conditions a pipeline needs to branch on are raised as [`TfError`] so they
//! survive `.context(..)` wrapping and can be recovered with [`kind_of`].
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required argument was empty or the call was made out of order.
    Validation,
    /// A file or archive that must exist was absent.
    NotFound,
    /// More than one candidate, or a file that must not exist already does.
    Conflict,
    /// Detailed-exit-code mode reported no drift and strict mode was on.
    NoChanges,
    /// The tool exited with an unexpected status.
    CommandFailed,
}

#[derive(Debug, Error)]
pub enum TfError {
    #[error("{0} cannot be empty")]
    EmptyArgument(&'static str),

    #[error("workspace {} has not been initialized or restored", .path.display())]
    NotInitialized { path: PathBuf },

    #[error("backend type {0:?} is not a valid backend identifier")]
    UnsupportedBackendType(String),

    #[error("{what} not found at {}", .path.display())]
    NotFound { what: &'static str, path: PathBuf },

    #[error("no archive file found at path: {}", .dir.display())]
    NoArchive { dir: PathBuf },

    #[error("multiple archive files found at path: {}\n{}", .dir.display(), .files.join("\n"))]
    MultipleArchives { dir: PathBuf, files: Vec<String> },

    #[error("output {name:?} not found in terraform output")]
    OutputNotFound { name: String },

    #[error("backend file already exists at {}", .path.display())]
    BackendFileExists { path: PathBuf },

    #[error("terraform {verb} reported no changes")]
    NoChanges { verb: String },

    #[error("command {args:?} returned non-zero exit status {}", exit_label(.code))]
    CommandFailed { code: Option<i32>, args: Vec<String> },
}

impl TfError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TfError::EmptyArgument(_)
            | TfError::NotInitialized { .. }
            | TfError::UnsupportedBackendType(_) => ErrorKind::Validation,
            TfError::NotFound { .. }
            | TfError::NoArchive { .. }
            | TfError::OutputNotFound { .. } => ErrorKind::NotFound,
            TfError::MultipleArchives { .. } | TfError::BackendFileExists { .. } => {
                ErrorKind::Conflict
            }
            TfError::NoChanges { .. } => ErrorKind::NoChanges,
            TfError::CommandFailed { .. } => ErrorKind::CommandFailed,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Classify an error raised anywhere in the crate, looking through context.
pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<TfError>().map(TfError::kind)
}

/// True when the error is the strict-mode "no changes" signal.
pub fn is_no_changes(err: &anyhow::Error) -> bool {
    kind_of(err) == Some(ErrorKind::NoChanges)
}

/// Reject an empty required path before any I/O happens.
pub fn require_path(path: &Path, name: &'static str) -> Result<(), TfError> {
    if path.as_os_str().is_empty() {
        return Err(TfError::EmptyArgument(name));
    }
    Ok(())
}

/// Reject a missing file with a typed not-found error.
pub fn require_file(path: &Path, what: &'static str) -> Result<(), TfError> {
    if !path.is_file() {
        return Err(TfError::NotFound {
            what,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}
