use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use super::{ArtifactRegistry, ArtifactRegistryEntry, RegistryError, validate_keys};

/// Registry kept in process memory. `load` and `save` do nothing.
#[derive(Debug, Default)]
pub struct MemoryArtifactRegistry {
    entries: RwLock<BTreeMap<String, Vec<ArtifactRegistryEntry>>>,
}

impl MemoryArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every namespace, including the empty ones.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<ArtifactRegistryEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of every namespace ever written to.
    pub fn processor_names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl ArtifactRegistry for MemoryArtifactRegistry {
    fn add(&self, processor_name: &str, entry: ArtifactRegistryEntry) -> Result<(), RegistryError> {
        validate_keys(processor_name, &entry.artifact_id)?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let namespace = entries.entry(processor_name.to_string()).or_default();
        namespace.retain(|existing| existing.artifact_id != entry.artifact_id);
        namespace.push(entry);
        Ok(())
    }

    fn remove(&self, processor_name: &str, artifact_id: &str) -> Result<(), RegistryError> {
        validate_keys(processor_name, artifact_id)?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(namespace) = entries.get_mut(processor_name) {
            namespace.retain(|existing| existing.artifact_id != artifact_id);
        }
        Ok(())
    }

    fn find_by_id(
        &self,
        processor_name: &str,
        artifact_id: &str,
    ) -> Result<Option<ArtifactRegistryEntry>, RegistryError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(processor_name).and_then(|namespace| {
            namespace
                .iter()
                .find(|entry| entry.artifact_id == artifact_id)
                .cloned()
        }))
    }

    fn find_all(&self, processor_name: &str) -> Result<Vec<ArtifactRegistryEntry>, RegistryError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(processor_name).cloned().unwrap_or_default())
    }

    fn load(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    fn save(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}
