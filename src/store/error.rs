// ABOUTME: State store error types with SNAFU pattern.
// ABOUTME: Carries the path or record involved so failures can be traced on disk.

use snafu::Snafu;
use std::path::PathBuf;

use crate::types::DeploymentId;

/// Failure reading or writing persisted rollout state.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("failed to create state directory {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to write {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to read {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to remove {}: {source}", path.display()))]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to encode deployment {id}: {source}"))]
    Encode {
        id: DeploymentId,
        source: serde_json::Error,
    },

    #[snafu(display("corrupt state file {}: {source}", path.display()))]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Injected or backend-specific failure with no file behind it.
    #[snafu(display("state store unavailable: {message}"))]
    Unavailable { message: String },
}

impl StoreError {
    /// Path of the file involved, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            StoreError::CreateDir { path, .. }
            | StoreError::Write { path, .. }
            | StoreError::Read { path, .. }
            | StoreError::Remove { path, .. }
            | StoreError::Decode { path, .. } => Some(path),
            StoreError::Encode { .. } | StoreError::Unavailable { .. } => None,
        }
    }
}
