use std::fs;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::Value;
use stagehand::registry::Metadata;
use stagehand::{
    ArtifactRegistry, ArtifactRegistryEntry, JsonArtifactRegistry, ProcessorArtifactRegistry,
    StagehandError, with_registry_session,
};
use tempfile::TempDir;

fn metadata(path: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("path".to_string(), path.into());
    metadata.insert("writeMode".to_string(), "RECREATE".into());
    metadata
}

#[test]
fn test_entries_survive_a_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("registry.json");

    let first = Arc::new(JsonArtifactRegistry::new(&path));
    with_registry_session(first.as_ref(), || {
        let scoped = ProcessorArtifactRegistry::new("file", first.clone());
        scoped.add("/out/a", Some(metadata("/out/a")))?;
        scoped.add("/out/b", Some(metadata("/out/b")))?;
        Ok(())
    })
    .unwrap();

    let second = JsonArtifactRegistry::new(&path);
    second.load().unwrap();
    let ids: Vec<String> = second
        .find_all("file")
        .unwrap()
        .into_iter()
        .map(|e| e.artifact_id)
        .collect();
    assert_eq!(ids, vec!["/out/a", "/out/b"]);
    assert_eq!(
        second
            .find_by_id("file", "/out/b")
            .unwrap()
            .unwrap()
            .metadata_str("path"),
        Some("/out/b")
    );
}

#[test]
fn test_saved_file_layout() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("registry.json");
    let registry = JsonArtifactRegistry::with_time_provider(
        &path,
        Arc::new(|| Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
    );

    registry
        .add("file", ArtifactRegistryEntry::new("/x", Some(metadata("/x"))))
        .unwrap();
    registry.add("other", ArtifactRegistryEntry::new("id", None)).unwrap();
    registry.remove("other", "id").unwrap();
    registry.save().unwrap();

    let saved: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["generatedAt"], "2024-01-02T03:04:05+00:00");
    assert_eq!(saved["entries"]["file"][0]["artifactId"], "/x");
    assert_eq!(saved["entries"]["file"][0]["metadata"]["writeMode"], "RECREATE");
    assert_eq!(saved["entries"]["other"], Value::Array(vec![]));
}

#[test]
fn test_session_saves_when_work_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("registry.json");
    let registry = Arc::new(JsonArtifactRegistry::new(&path));

    let result: Result<(), StagehandError> = with_registry_session(registry.as_ref(), || {
        registry.add("file", ArtifactRegistryEntry::new("/partial", None))?;
        Err(StagehandError::Validation("boom".to_string()))
    });

    assert!(matches!(result, Err(StagehandError::Validation(_))));
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("/partial"));
}

#[test]
fn test_malformed_registry_fails_the_session() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("registry.json");
    fs::write(&path, "{ not json").unwrap();
    let registry = JsonArtifactRegistry::new(&path);

    let mut ran = false;
    let result = with_registry_session(&registry, || {
        ran = true;
        Ok(())
    });

    assert!(result.is_err());
    assert!(!ran);
    // The broken file is left for inspection
    assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
}
