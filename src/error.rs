// ABOUTME: Application-wide error types for pdo.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::DeployError;
use crate::http::HttpError;
use crate::store::StoreError;
use crate::types::DeploymentId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("deployment {id} rolled back: {reason}")]
    RolledBack { id: DeploymentId, reason: String },

    #[error("deployment {0} interrupted; run `pdo resume` to continue it")]
    Interrupted(DeploymentId),

    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] HttpError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
