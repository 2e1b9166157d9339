use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, artifacts_of};
use crate::cancel::{CancelReason, CancellationToken};
use crate::error::{ErrorGroup, Result, StagehandError};
use crate::fs::{FileMode, FileSystem};
use crate::pipeline::ArtifactProcessor;
use crate::registry::{ArtifactRegistryEntry, Metadata, ProcessorArtifactRegistry};

pub const FILE_ARTIFACT_PROCESSOR_NAME: &str = "file";

const METADATA_PATH: &str = "path";
const METADATA_WRITE_MODE: &str = "writeMode";

/// Whether a file is rewritten on every run or only created once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteMode {
    Recreate,
    #[default]
    WriteOnce,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Recreate => "RECREATE",
            WriteMode::WriteOnce => "WRITE_ONCE",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "RECREATE" => Ok(WriteMode::Recreate),
            "WRITE_ONCE" => Ok(WriteMode::WriteOnce),
            other => Err(format!("unknown write mode '{}'", other)),
        }
    }
}

/// A file or directory to materialize. Directories carry [`FileMode::DIR`]
/// and no data.
#[derive(Debug, Clone, PartialEq)]
pub struct FileArtifact {
    pub path: PathBuf,
    pub data: Vec<u8>,
    pub mode: FileMode,
    pub write_mode: WriteMode,
}

impl FileArtifact {
    pub fn file(path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
            mode: FileMode::DEFAULT_FILE,
            write_mode: WriteMode::default(),
        }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: Vec::new(),
            mode: FileMode::DEFAULT_DIR,
            write_mode: WriteMode::default(),
        }
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Replace the permission bits, keeping the directory flag.
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.mode = if self.mode.is_dir() {
            FileMode::dir(permissions)
        } else {
            FileMode::file(permissions)
        };
        self
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    pub fn describe(&self) -> String {
        let kind = if self.is_dir() {
            "Create directory"
        } else {
            "Write file"
        };
        format!("{} {} ({})", kind, self.path.display(), self.write_mode)
    }
}

impl Artifact for FileArtifact {
    fn id(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct CleanupTarget {
    entry: ArtifactRegistryEntry,
    path: PathBuf,
}

/// Materializes [`FileArtifact`]s and removes the `RECREATE` ones left over
/// from the previous run.
pub struct FileArtifactProcessor {
    fs: Arc<dyn FileSystem>,
}

impl FileArtifactProcessor {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    fn clean_up(
        &self,
        ctx: &CancellationToken,
        registry: &ProcessorArtifactRegistry,
    ) -> Result<()> {
        ctx.check()?;

        let mut targets = Vec::new();
        for entry in registry.find_all()? {
            let (path, write_mode) = validate_entry(&entry)?;
            if write_mode == WriteMode::Recreate {
                targets.push(CleanupTarget { entry, path });
            }
        }

        tracing::debug!("Cleaning up {} artifact(s)", targets.len());

        let errors = Mutex::new(ErrorGroup::new());
        let cancelled = rayon::scope(|s| {
            for target in &targets {
                if let Some(reason) = ctx.reason() {
                    return Some(reason);
                }
                let errors = &errors;
                s.spawn(move |_| {
                    if let Err(e) = self.remove_artifact(target, registry) {
                        tracing::error!("{}", e);
                        errors.lock().unwrap_or_else(PoisonError::into_inner).push(e);
                    }
                });
            }
            None
        });

        finish_fan_out(ctx, cancelled, errors, StagehandError::Cleanup)
    }

    /// Registry entry first, then the file. A failed delete restores the entry
    /// so the next run retries.
    fn remove_artifact(
        &self,
        target: &CleanupTarget,
        registry: &ProcessorArtifactRegistry,
    ) -> Result<()> {
        let artifact_id = &target.entry.artifact_id;
        registry.remove(artifact_id)?;

        match self.fs.remove(&target.path) {
            Ok(()) => {
                tracing::info!("Removed artifact {}", target.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Artifact {} was already gone", target.path.display());
                Ok(())
            }
            Err(delete) => match registry.add(artifact_id, target.entry.metadata.clone()) {
                Ok(()) => Err(StagehandError::CleanupDelete {
                    path: target.path.clone(),
                    source: delete,
                }),
                Err(rollback) => Err(StagehandError::CleanupRollback {
                    path: target.path.clone(),
                    delete,
                    rollback,
                }),
            },
        }
    }

    fn write(
        &self,
        ctx: &CancellationToken,
        artifacts: &[&FileArtifact],
        registry: &ProcessorArtifactRegistry,
    ) -> Result<()> {
        let (directories, files): (Vec<&FileArtifact>, Vec<&FileArtifact>) =
            artifacts.iter().copied().partition(|artifact| artifact.is_dir());

        let mut errors = ErrorGroup::new();

        // Parents are expected before their children
        for directory in directories {
            ctx.check()?;
            if let Err(e) = self.write_artifact(directory, registry) {
                tracing::error!("{}", e);
                errors.push(e);
            }
        }

        let errors = Mutex::new(errors);
        let cancelled = rayon::scope(|s| {
            for &file in &files {
                if let Some(reason) = ctx.reason() {
                    return Some(reason);
                }
                let errors = &errors;
                s.spawn(move |_| {
                    if let Err(e) = self.write_artifact(file, registry) {
                        tracing::error!("{}", e);
                        errors.lock().unwrap_or_else(PoisonError::into_inner).push(e);
                    }
                });
            }
            None
        });

        finish_fan_out(ctx, cancelled, errors, StagehandError::Write)
    }

    fn write_artifact(
        &self,
        artifact: &FileArtifact,
        registry: &ProcessorArtifactRegistry,
    ) -> Result<()> {
        if artifact.path.as_os_str().is_empty() {
            return Err(StagehandError::MissingPath {
                artifact_id: artifact.id(),
            });
        }

        let path = self
            .fs
            .abs(&artifact.path)
            .map_err(|source| write_error(&artifact.path, source))?;
        let exists = self
            .fs
            .stat(&path)
            .map_err(|source| write_error(&path, source))?
            .is_some();

        if exists {
            if artifact.write_mode == WriteMode::WriteOnce {
                tracing::debug!("Skipping existing artifact {}", path.display());
                return Ok(());
            }
            return Err(StagehandError::ArtifactStillExists { path });
        }

        if artifact.is_dir() {
            self.fs.mkdir(&path, artifact.mode)
        } else {
            self.fs.write_file(&path, &artifact.data, artifact.mode)
        }
        .map_err(|source| write_error(&path, source))?;

        if artifact.write_mode != WriteMode::WriteOnce {
            let path_str = path.to_string_lossy().into_owned();
            let mut metadata = Metadata::new();
            metadata.insert(METADATA_PATH.to_string(), path_str.clone().into());
            metadata.insert(
                METADATA_WRITE_MODE.to_string(),
                artifact.write_mode.as_str().into(),
            );
            registry.add(&path_str, Some(metadata))?;
        }

        tracing::info!(status = "success", "{}", artifact.describe());
        Ok(())
    }
}

impl ArtifactProcessor for FileArtifactProcessor {
    fn name(&self) -> &str {
        FILE_ARTIFACT_PROCESSOR_NAME
    }

    fn process(
        &self,
        ctx: &CancellationToken,
        artifacts: &[Arc<dyn Artifact>],
        registry: &ProcessorArtifactRegistry,
    ) -> Result<()> {
        ctx.check()?;

        self.clean_up(ctx, registry)?;

        let files = artifacts_of::<FileArtifact>(artifacts);
        self.write(ctx, &files, registry)
    }
}

fn validate_entry(entry: &ArtifactRegistryEntry) -> Result<(PathBuf, WriteMode)> {
    let invalid = |reason: &str| StagehandError::InvalidRegistryEntry {
        artifact_id: entry.artifact_id.clone(),
        reason: reason.to_string(),
    };

    if entry.metadata.is_none() {
        return Err(invalid("missing metadata"));
    }
    let path = entry
        .metadata_str(METADATA_PATH)
        .filter(|path| !path.is_empty())
        .ok_or_else(|| invalid("missing path"))?;
    let write_mode = entry
        .metadata_str(METADATA_WRITE_MODE)
        .filter(|mode| !mode.is_empty())
        .ok_or_else(|| invalid("missing write mode"))?
        .parse::<WriteMode>()
        .map_err(|e| invalid(&e))?;

    Ok((PathBuf::from(path), write_mode))
}

fn write_error(path: &Path, source: std::io::Error) -> StagehandError {
    StagehandError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    }
}

// Cancellation wins over collected errors, including a cancel that arrived
// while the spawned tasks were still running.
fn finish_fan_out(
    ctx: &CancellationToken,
    cancelled: Option<CancelReason>,
    errors: Mutex<ErrorGroup>,
    wrap: fn(ErrorGroup) -> StagehandError,
) -> Result<()> {
    if let Some(reason) = cancelled.or_else(|| ctx.reason()) {
        return Err(StagehandError::Cancelled(reason));
    }

    let errors = errors.into_inner().unwrap_or_else(PoisonError::into_inner);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(wrap(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactList;
    use crate::error::ErrorCode;
    use crate::fs::MemoryFileSystem;
    use crate::registry::{ArtifactRegistry, MemoryArtifactRegistry};

    struct Harness {
        fs: Arc<MemoryFileSystem>,
        registry: ProcessorArtifactRegistry,
        processor: FileArtifactProcessor,
    }

    impl Harness {
        fn new() -> Self {
            let fs = Arc::new(MemoryFileSystem::new());
            let shared: Arc<dyn ArtifactRegistry> = Arc::new(MemoryArtifactRegistry::new());
            Self {
                processor: FileArtifactProcessor::new(fs.clone()),
                registry: ProcessorArtifactRegistry::new(FILE_ARTIFACT_PROCESSOR_NAME, shared),
                fs,
            }
        }

        fn run(&self, artifacts: Vec<FileArtifact>) -> Result<()> {
            let artifacts: ArtifactList = artifacts
                .into_iter()
                .map(|a| Arc::new(a) as Arc<dyn Artifact>)
                .collect();
            self.processor
                .process(&CancellationToken::new(), &artifacts, &self.registry)
        }

        fn registered_ids(&self) -> Vec<String> {
            self.registry
                .find_all()
                .unwrap()
                .into_iter()
                .map(|e| e.artifact_id)
                .collect()
        }
    }

    #[test]
    fn test_write_mode_parsing() {
        assert_eq!("RECREATE".parse::<WriteMode>(), Ok(WriteMode::Recreate));
        assert_eq!("WRITE_ONCE".parse::<WriteMode>(), Ok(WriteMode::WriteOnce));
        assert!("SOMETIMES".parse::<WriteMode>().is_err());
        assert_eq!(WriteMode::default(), WriteMode::WriteOnce);
    }

    #[test]
    fn test_describe() {
        let file = FileArtifact::file("/out/a.txt", "a").with_write_mode(WriteMode::Recreate);
        assert_eq!(file.describe(), "Write file /out/a.txt (RECREATE)");
        assert_eq!(
            FileArtifact::directory("/out").describe(),
            "Create directory /out (WRITE_ONCE)"
        );
        assert_eq!(file.id(), "/out/a.txt");
    }

    #[test]
    fn test_writes_directories_then_files() {
        let harness = Harness::new();

        harness
            .run(vec![
                FileArtifact::file("/out/sub/b.txt", "b"),
                FileArtifact::directory("/out"),
                FileArtifact::directory("/out/sub"),
                FileArtifact::file("/out/a.txt", "a"),
            ])
            .unwrap();

        assert_eq!(harness.fs.read_file(Path::new("/out/a.txt")).unwrap(), b"a");
        assert_eq!(
            harness.fs.read_file(Path::new("/out/sub/b.txt")).unwrap(),
            b"b"
        );
        // Write-once artifacts are not tracked
        assert!(harness.registered_ids().is_empty());
    }

    #[test]
    fn test_directories_are_created_in_caller_order() {
        let harness = Harness::new();

        let err = harness
            .run(vec![
                FileArtifact::directory("/parent/child"),
                FileArtifact::directory("/parent"),
            ])
            .unwrap_err();

        match err {
            StagehandError::Write(group) => {
                assert_eq!(group.len(), 1);
                match &group.errors()[0] {
                    StagehandError::ArtifactWrite { path, .. } => {
                        assert_eq!(path, Path::new("/parent/child"));
                    }
                    other => panic!("Expected artifact write error, got {:?}", other),
                }
            }
            other => panic!("Expected write error, got {:?}", other),
        }
        // The child was not retried after its parent appeared
        assert!(harness.fs.stat(Path::new("/parent")).unwrap().is_some());
        assert!(harness.fs.stat(Path::new("/parent/child")).unwrap().is_none());
    }

    #[test]
    fn test_recreate_artifacts_are_registered() {
        let harness = Harness::new();

        harness
            .run(vec![
                FileArtifact::directory("/gen").with_write_mode(WriteMode::Recreate),
                FileArtifact::file("/gen/x", "x").with_write_mode(WriteMode::Recreate),
            ])
            .unwrap();

        let mut ids = harness.registered_ids();
        ids.sort();
        assert_eq!(ids, vec!["/gen".to_string(), "/gen/x".to_string()]);

        let entry = harness.registry.find_by_id("/gen/x").unwrap().unwrap();
        assert_eq!(entry.metadata_str("path"), Some("/gen/x"));
        assert_eq!(entry.metadata_str("writeMode"), Some("RECREATE"));
    }

    #[test]
    fn test_second_run_recreates_artifacts() {
        let harness = Harness::new();

        harness
            .run(vec![
                FileArtifact::file("/x", "v1").with_write_mode(WriteMode::Recreate),
            ])
            .unwrap();
        harness
            .run(vec![
                FileArtifact::file("/x", "v2").with_write_mode(WriteMode::Recreate),
            ])
            .unwrap();

        assert_eq!(harness.fs.read_file(Path::new("/x")).unwrap(), b"v2");
        assert_eq!(harness.registered_ids(), vec!["/x".to_string()]);
    }

    #[test]
    fn test_stale_recreate_artifact_is_removed() {
        let harness = Harness::new();
        harness
            .run(vec![
                FileArtifact::file("/x", "x").with_write_mode(WriteMode::Recreate),
            ])
            .unwrap();

        harness.run(vec![]).unwrap();

        assert!(harness.fs.stat(Path::new("/x")).unwrap().is_none());
        assert!(harness.registered_ids().is_empty());
    }

    #[test]
    fn test_write_once_existing_is_skipped() {
        let harness = Harness::new();
        harness
            .fs
            .write_file(Path::new("/y"), b"user edits", FileMode::DEFAULT_FILE)
            .unwrap();

        harness
            .run(vec![FileArtifact::file("/y", "scaffold")])
            .unwrap();

        assert_eq!(harness.fs.read_file(Path::new("/y")).unwrap(), b"user edits");
    }

    #[test]
    fn test_untracked_existing_recreate_target_fails() {
        let harness = Harness::new();
        harness
            .fs
            .write_file(Path::new("/z"), b"", FileMode::DEFAULT_FILE)
            .unwrap();

        let err = harness
            .run(vec![
                FileArtifact::file("/z", "z").with_write_mode(WriteMode::Recreate),
            ])
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Write);
        match err {
            StagehandError::Write(group) => {
                assert_eq!(group.len(), 1);
                assert!(matches!(
                    group.errors()[0],
                    StagehandError::ArtifactStillExists { .. }
                ));
            }
            other => panic!("Expected write error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_path_is_collected_without_stopping_siblings() {
        let harness = Harness::new();

        let err = harness
            .run(vec![
                FileArtifact::file("", "orphan"),
                FileArtifact::file("/ok", "ok"),
            ])
            .unwrap_err();

        match err {
            StagehandError::Write(group) => {
                assert_eq!(group.len(), 1);
                assert!(matches!(
                    group.errors()[0],
                    StagehandError::MissingPath { .. }
                ));
            }
            other => panic!("Expected write error, got {:?}", other),
        }
        assert_eq!(harness.fs.read_file(Path::new("/ok")).unwrap(), b"ok");
    }

    #[test]
    fn test_corrupt_registry_entry_fails_clean_up() {
        let harness = Harness::new();
        harness.registry.add("/broken", None).unwrap();

        let err = harness
            .run(vec![FileArtifact::file("/never", "n")])
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Cleanup);
        assert!(matches!(err, StagehandError::InvalidRegistryEntry { .. }));
        // The write phase never ran
        assert!(harness.fs.stat(Path::new("/never")).unwrap().is_none());
    }

    #[test]
    fn test_entry_validation() {
        let mut metadata = Metadata::new();
        metadata.insert("path".to_string(), "/a".into());
        let missing_mode = ArtifactRegistryEntry::new("a", Some(metadata.clone()));
        assert!(validate_entry(&missing_mode).is_err());

        metadata.insert("writeMode".to_string(), "".into());
        let empty_mode = ArtifactRegistryEntry::new("a", Some(metadata.clone()));
        assert!(validate_entry(&empty_mode).is_err());

        metadata.insert("writeMode".to_string(), "WRITE_ONCE".into());
        let valid = ArtifactRegistryEntry::new("a", Some(metadata));
        assert_eq!(
            validate_entry(&valid).unwrap(),
            (PathBuf::from("/a"), WriteMode::WriteOnce)
        );
    }

    #[test]
    fn test_write_once_entries_are_not_cleaned_up() {
        let harness = Harness::new();
        harness
            .fs
            .write_file(Path::new("/keep"), b"k", FileMode::DEFAULT_FILE)
            .unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("path".to_string(), "/keep".into());
        metadata.insert("writeMode".to_string(), "WRITE_ONCE".into());
        harness.registry.add("/keep", Some(metadata)).unwrap();

        harness.run(vec![]).unwrap();

        assert!(harness.fs.stat(Path::new("/keep")).unwrap().is_some());
        assert_eq!(harness.registered_ids(), vec!["/keep".to_string()]);
    }

    #[test]
    fn test_cancelled_context_does_nothing() {
        let harness = Harness::new();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let artifacts: ArtifactList = vec![Arc::new(FileArtifact::file("/a", "a"))];

        let err = harness
            .processor
            .process(&ctx, &artifacts, &harness.registry)
            .unwrap_err();

        assert!(matches!(
            err,
            StagehandError::Cancelled(CancelReason::Cancelled)
        ));
        assert!(harness.fs.paths().is_empty());
    }
}
