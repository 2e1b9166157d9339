use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::cancel::CancelReason;
use crate::dependency_resolver::DependencyError;
use crate::registry::RegistryError;

/// Stable, machine-readable classification of a [`StagehandError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Validation,
    UnresolvedDependency,
    CircularDependency,
    Registry,
    Cleanup,
    CleanupRollback,
    Write,
    Cancelled,
    Io,
    Manifest,
    Config,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "validation",
            ErrorCode::UnresolvedDependency => "unresolved_dependency",
            ErrorCode::CircularDependency => "circular_dependency",
            ErrorCode::Registry => "registry",
            ErrorCode::Cleanup => "cleanup",
            ErrorCode::CleanupRollback => "cleanup_rollback",
            ErrorCode::Write => "write",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Io => "io",
            ErrorCode::Manifest => "manifest",
            ErrorCode::Config => "config",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StagehandError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Invalid registry entry '{artifact_id}': {reason}")]
    InvalidRegistryEntry { artifact_id: String, reason: String },

    #[error("Artifact {} still exists, clean-up failed silently", .path.display())]
    ArtifactStillExists { path: PathBuf },

    #[error("Failed to delete artifact {}: {source}", .path.display())]
    CleanupDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Failed to delete artifact {} ({delete}) and failed to restore its registry entry ({rollback})",
        .path.display()
    )]
    CleanupRollback {
        path: PathBuf,
        delete: std::io::Error,
        rollback: RegistryError,
    },

    #[error("Clean-up failed: {0}")]
    Cleanup(ErrorGroup),

    #[error("File artifact '{artifact_id}' has no path")]
    MissingPath { artifact_id: String },

    #[error("Failed to write artifact {}: {source}", .path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failed: {0}")]
    Write(ErrorGroup),

    #[error("Operation cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StagehandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StagehandError::Validation(_) => ErrorCode::Validation,
            StagehandError::Dependency(DependencyError::UnresolvedDependency { .. }) => {
                ErrorCode::UnresolvedDependency
            }
            StagehandError::Dependency(DependencyError::CircularDependency(_)) => {
                ErrorCode::CircularDependency
            }
            StagehandError::Registry(RegistryError::EmptyProcessorName)
            | StagehandError::Registry(RegistryError::EmptyArtifactId { .. }) => {
                ErrorCode::Validation
            }
            StagehandError::Registry(_) => ErrorCode::Registry,
            StagehandError::InvalidRegistryEntry { .. }
            | StagehandError::ArtifactStillExists { .. }
            | StagehandError::CleanupDelete { .. }
            | StagehandError::Cleanup(_) => ErrorCode::Cleanup,
            StagehandError::CleanupRollback { .. } => ErrorCode::CleanupRollback,
            StagehandError::MissingPath { .. }
            | StagehandError::ArtifactWrite { .. }
            | StagehandError::Write(_) => ErrorCode::Write,
            StagehandError::Cancelled(_) => ErrorCode::Cancelled,
            StagehandError::Io(_) => ErrorCode::Io,
            StagehandError::Manifest(_) | StagehandError::Json(_) => ErrorCode::Manifest,
            StagehandError::Config(_) => ErrorCode::Config,
            StagehandError::Other(_) => ErrorCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, StagehandError>;

/// A collection of failures gathered from sibling tasks.
#[derive(Debug, Default)]
pub struct ErrorGroup {
    errors: Vec<StagehandError>,
}

impl ErrorGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: StagehandError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[StagehandError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<StagehandError> {
        self.errors
    }
}

impl From<Vec<StagehandError>> for ErrorGroup {
    fn from(errors: Vec<StagehandError>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for ErrorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorGroup {}
