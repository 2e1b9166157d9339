use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{ArtifactRegistry, ArtifactRegistryEntry, MemoryArtifactRegistry, RegistryError};

/// Registry file name used when none is configured.
pub const DEFAULT_REGISTRY_FILE: &str = ".stagehand-registry.json";

/// Source of the `generatedAt` stamp written on save.
pub type TimeProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// On-disk layout of the registry file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(rename = "generatedAt", default)]
    pub generated_at: String,
    #[serde(default)]
    pub entries: BTreeMap<String, Option<Vec<ArtifactRegistryEntry>>>,
}

/// Registry persisted as a JSON file.
pub struct JsonArtifactRegistry {
    path: PathBuf,
    time_provider: TimeProvider,
    inner: MemoryArtifactRegistry,
}

impl JsonArtifactRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_time_provider(path, Arc::new(Utc::now))
    }

    pub fn with_time_provider(path: impl Into<PathBuf>, time_provider: TimeProvider) -> Self {
        Self {
            path: path.into(),
            time_provider,
            inner: MemoryArtifactRegistry::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            generated_at: (self.time_provider)().to_rfc3339(),
            entries: self
                .inner
                .snapshot()
                .into_iter()
                .map(|(processor, entries)| (processor, Some(entries)))
                .collect(),
        }
    }
}

impl ArtifactRegistry for JsonArtifactRegistry {
    fn add(&self, processor_name: &str, entry: ArtifactRegistryEntry) -> Result<(), RegistryError> {
        self.inner.add(processor_name, entry)
    }

    fn remove(&self, processor_name: &str, artifact_id: &str) -> Result<(), RegistryError> {
        self.inner.remove(processor_name, artifact_id)
    }

    fn find_by_id(
        &self,
        processor_name: &str,
        artifact_id: &str,
    ) -> Result<Option<ArtifactRegistryEntry>, RegistryError> {
        self.inner.find_by_id(processor_name, artifact_id)
    }

    fn find_all(&self, processor_name: &str) -> Result<Vec<ArtifactRegistryEntry>, RegistryError> {
        self.inner.find_all(processor_name)
    }

    fn load(&self) -> Result<(), RegistryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No registry file at {}", self.path.display());
                return Ok(());
            }
            Err(e) => return Err(RegistryError::Read(e)),
        };

        if content.trim().is_empty() {
            return Ok(());
        }

        let snapshot: RegistrySnapshot = serde_json::from_str(&content)?;
        let mut count = 0;
        for (processor, entries) in snapshot.entries {
            for entry in entries.into_iter().flatten() {
                self.inner.add(&processor, entry)?;
                count += 1;
            }
        }

        tracing::debug!(
            "Loaded {} registry entries from {}",
            count,
            self.path.display()
        );
        Ok(())
    }

    fn save(&self) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;

        // Write to a temp file next to the target, then move it into place
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir).map_err(RegistryError::Write)?;
        file.write_all(json.as_bytes())
            .map_err(RegistryError::Write)?;
        file.persist(&self.path)
            .map_err(|e| RegistryError::Write(e.error))?;

        tracing::debug!("Saved artifact registry to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Metadata;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time() -> TimeProvider {
        Arc::new(|| Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    fn entry(id: &str) -> ArtifactRegistryEntry {
        let mut metadata = Metadata::new();
        metadata.insert("path".to_string(), format!("/out/{}", id).into());
        metadata.insert("writeMode".to_string(), "RECREATE".into());
        ArtifactRegistryEntry::new(id, Some(metadata))
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let registry = JsonArtifactRegistry::new(temp_dir.path().join("missing.json"));

        registry.load().unwrap();
        assert!(registry.find_all("p1").unwrap().is_empty());
    }

    #[test]
    fn test_load_empty_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("registry.json");
        fs::write(&path, "").unwrap();

        let registry = JsonArtifactRegistry::new(&path);
        registry.load().unwrap();
        assert!(registry.find_all("p1").unwrap().is_empty());
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("registry.json");
        fs::write(&path, "{ not json").unwrap();

        let registry = JsonArtifactRegistry::new(&path);
        assert!(matches!(registry.load(), Err(RegistryError::Malformed(_))));
    }

    #[test]
    fn test_load_rejects_entry_without_id() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("registry.json");
        fs::write(
            &path,
            r#"{"generatedAt": "", "entries": {"p1": [{"metadata": null}]}}"#,
        )
        .unwrap();

        let registry = JsonArtifactRegistry::new(&path);
        assert!(matches!(
            registry.load(),
            Err(RegistryError::EmptyArtifactId { .. })
        ));
    }

    #[test]
    fn test_save_writes_snapshot_layout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("registry.json");
        let registry = JsonArtifactRegistry::with_time_provider(&path, fixed_time());
        registry.add("files", entry("a")).unwrap();

        registry.save().unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["generatedAt"], "2024-05-01T12:00:00+00:00");
        assert_eq!(value["entries"]["files"][0]["artifactId"], "a");
        assert_eq!(
            value["entries"]["files"][0]["metadata"]["writeMode"],
            "RECREATE"
        );
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("registry.json");

        let registry = JsonArtifactRegistry::with_time_provider(&path, fixed_time());
        registry.add("p1", entry("a")).unwrap();
        registry.add("p1", entry("b")).unwrap();
        registry.add("p2", entry("c")).unwrap();
        registry.save().unwrap();

        let reloaded = JsonArtifactRegistry::new(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.find_all("p1").unwrap(), vec![entry("a"), entry("b")]);
        assert_eq!(reloaded.find_all("p2").unwrap(), vec![entry("c")]);
    }

    #[test]
    fn test_empty_namespace_is_saved_not_pruned() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("registry.json");

        let registry = JsonArtifactRegistry::with_time_provider(&path, fixed_time());
        registry.add("p1", entry("a")).unwrap();
        registry.remove("p1", "a").unwrap();
        registry.save().unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["entries"]["p1"], serde_json::json!([]));

        let reloaded = JsonArtifactRegistry::new(&path);
        reloaded.load().unwrap();
        assert!(reloaded.find_all("p1").unwrap().is_empty());
    }

    #[test]
    fn test_load_accepts_null_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("registry.json");
        fs::write(&path, r#"{"generatedAt": "x", "entries": {"p1": null}}"#).unwrap();

        let registry = JsonArtifactRegistry::new(&path);
        registry.load().unwrap();
        assert!(registry.find_all("p1").unwrap().is_empty());
    }
}
