//! Ledger of the artifacts each processor produced, kept across runs so
//! that stale outputs can be cleaned up.
//!
//! Entries are namespaced by processor name and keyed by artifact ID within a
//! namespace. [`MemoryArtifactRegistry`] keeps them in process memory,
//! [`JsonArtifactRegistry`] additionally persists them to a JSON file.

mod json;
mod memory;
mod scoped;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use json::{DEFAULT_REGISTRY_FILE, JsonArtifactRegistry, RegistrySnapshot, TimeProvider};
pub use memory::MemoryArtifactRegistry;
pub use scoped::ProcessorArtifactRegistry;

use crate::error::{Result, StagehandError};

/// Free-form metadata stored next to an artifact ID.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Processor name must not be empty")]
    EmptyProcessorName,

    #[error("Artifact ID must not be empty (processor '{processor}')")]
    EmptyArtifactId { processor: String },

    #[error("Failed to read registry file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to write registry file: {0}")]
    Write(#[source] std::io::Error),

    #[error("Malformed registry file: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRegistryEntry {
    #[serde(rename = "artifactId", default)]
    pub artifact_id: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl ArtifactRegistryEntry {
    pub fn new(artifact_id: impl Into<String>, metadata: Option<Metadata>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            metadata,
        }
    }

    /// String value of a metadata key, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// Storage for artifact registry entries.
///
/// Implementations are shared between concurrently running tasks and must do
/// their own locking.
pub trait ArtifactRegistry: Send + Sync {
    /// Insert or replace the entry with the same artifact ID. The replaced
    /// entry moves to the end of the namespace.
    fn add(&self, processor_name: &str, entry: ArtifactRegistryEntry)
    -> std::result::Result<(), RegistryError>;

    /// Removing an unknown entry is not an error.
    fn remove(&self, processor_name: &str, artifact_id: &str)
    -> std::result::Result<(), RegistryError>;

    fn find_by_id(
        &self,
        processor_name: &str,
        artifact_id: &str,
    ) -> std::result::Result<Option<ArtifactRegistryEntry>, RegistryError>;

    /// Entries of a namespace in insertion order; empty when the namespace is unknown.
    fn find_all(
        &self,
        processor_name: &str,
    ) -> std::result::Result<Vec<ArtifactRegistryEntry>, RegistryError>;

    fn load(&self) -> std::result::Result<(), RegistryError>;

    fn save(&self) -> std::result::Result<(), RegistryError>;
}

pub(crate) fn validate_keys(
    processor_name: &str,
    artifact_id: &str,
) -> std::result::Result<(), RegistryError> {
    if processor_name.is_empty() {
        return Err(RegistryError::EmptyProcessorName);
    }
    if artifact_id.is_empty() {
        return Err(RegistryError::EmptyArtifactId {
            processor: processor_name.to_string(),
        });
    }
    Ok(())
}

/// Runs `f` between a registry `load` and `save`.
///
/// `save` runs even when `f` fails; in that case a save failure is logged and
/// the error from `f` is returned.
pub fn with_registry_session<T>(
    registry: &dyn ArtifactRegistry,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    registry.load()?;

    let result = f();
    let saved = registry.save();

    match (result, saved) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(save_error)) => Err(StagehandError::Registry(save_error)),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(save_error)) => {
            tracing::error!("Failed to save artifact registry: {}", save_error);
            Err(error)
        }
    }
}
