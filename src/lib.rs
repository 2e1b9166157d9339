pub mod artifact;
pub mod cancel;
pub mod config;
pub mod dag;
pub mod dependency_resolver;
pub mod discovery;
pub mod error;
pub mod file_artifact;
pub mod fs;
pub mod loader;
pub mod pipeline;
pub mod registry;
pub mod unit;

pub use artifact::{Artifact, ArtifactList, artifacts_of, find_artifact};
pub use cancel::{CancelReason, CancellationToken};
pub use config::Config;
pub use dependency_resolver::{
    DependencyError, DependencyNode, DependencyProvider, DependencyResolverProcessor,
    ResolvedDependencies, build_dependency_nodes, resolve_dependencies,
};
pub use discovery::{DiscoveredManifest, discover_manifests};
pub use error::{ErrorCode, ErrorGroup, Result, StagehandError};
pub use file_artifact::{FileArtifact, FileArtifactProcessor, WriteMode};
pub use fs::{FileInfo, FileMode, FileSystem, LocalFileSystem, MemoryFileSystem};
pub use loader::{DeclaredDependencyProvider, FileUnitProcessor, load_manifest, load_manifests};
pub use pipeline::{ArtifactProcessor, Pipeline, Processor, RunSummary};
pub use registry::{
    ArtifactRegistry, ArtifactRegistryEntry, JsonArtifactRegistry, MemoryArtifactRegistry,
    ProcessorArtifactRegistry, RegistryError, with_registry_session,
};
pub use unit::{Source, SourceFormat, Unit, UnitId, UnitKind};
