use std::sync::Arc;

use super::{ArtifactRegistry, ArtifactRegistryEntry, Metadata, RegistryError};

/// View of an [`ArtifactRegistry`] restricted to one processor's namespace.
#[derive(Clone)]
pub struct ProcessorArtifactRegistry {
    processor_name: String,
    registry: Arc<dyn ArtifactRegistry>,
}

impl ProcessorArtifactRegistry {
    pub fn new(processor_name: impl Into<String>, registry: Arc<dyn ArtifactRegistry>) -> Self {
        Self {
            processor_name: processor_name.into(),
            registry,
        }
    }

    pub fn processor_name(&self) -> &str {
        &self.processor_name
    }

    pub fn add(&self, artifact_id: &str, metadata: Option<Metadata>) -> Result<(), RegistryError> {
        self.registry.add(
            &self.processor_name,
            ArtifactRegistryEntry::new(artifact_id, metadata),
        )
    }

    pub fn remove(&self, artifact_id: &str) -> Result<(), RegistryError> {
        self.registry.remove(&self.processor_name, artifact_id)
    }

    pub fn find_by_id(
        &self,
        artifact_id: &str,
    ) -> Result<Option<ArtifactRegistryEntry>, RegistryError> {
        self.registry.find_by_id(&self.processor_name, artifact_id)
    }

    pub fn find_all(&self) -> Result<Vec<ArtifactRegistryEntry>, RegistryError> {
        self.registry.find_all(&self.processor_name)
    }
}
