use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::artifact::ArtifactList;
use crate::cancel::CancellationToken;
use crate::dependency_resolver::DependencyProvider;
use crate::discovery::DiscoveredManifest;
use crate::error::{Result, StagehandError};
use crate::file_artifact::{FileArtifact, WriteMode};
use crate::fs::{FileMode, FileSystem};
use crate::pipeline::Processor;
use crate::unit::{Source, SourceFormat, Unit, UnitId};

pub const FILE_UNIT_PROCESSOR_NAME: &str = "files";

const DEFAULT_UNIT_KIND: &str = "unit";

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    units: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnitDeclaration {
    id: String,
    kind: Option<String>,
    description: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    files: Vec<FileDeclaration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileDeclaration {
    path: String,
    #[serde(default)]
    content: String,
    mode: Option<String>,
    #[serde(default)]
    directory: bool,
    #[serde(default)]
    write_mode: WriteMode,
}

impl FileDeclaration {
    fn into_artifact(self, base: &Path) -> Result<FileArtifact> {
        let permissions = self.mode.as_deref().map(parse_mode).transpose()?;

        let path = if self.path.is_empty() {
            PathBuf::new()
        } else {
            base.join(&self.path)
        };

        let mut artifact = if self.directory {
            FileArtifact::directory(path)
        } else {
            FileArtifact::file(path, self.content.into_bytes())
        };
        if let Some(permissions) = permissions {
            artifact = artifact.with_permissions(permissions);
        }

        Ok(artifact.with_write_mode(self.write_mode))
    }
}

fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.trim_start_matches("0o");
    u32::from_str_radix(digits, 8)
        .map_err(|_| StagehandError::Manifest(format!("Invalid file mode '{}'", mode)))
}

fn parse_declaration(unit: &Unit) -> Result<UnitDeclaration> {
    serde_json::from_slice(&unit.source.data).map_err(|e| {
        StagehandError::Manifest(format!(
            "Invalid unit '{}' in {}: {}",
            unit.id, unit.source.location, e
        ))
    })
}

/// Parse one manifest into units. Each unit keeps its own JSON object as
/// source data.
pub fn load_manifest(fs: &dyn FileSystem, manifest: &DiscoveredManifest) -> Result<Vec<Unit>> {
    let content = fs.read_file(&manifest.path)?;
    let location = manifest.path.to_string_lossy().into_owned();

    let document: ManifestDocument = serde_json::from_slice(&content).map_err(|e| {
        StagehandError::Manifest(format!("Failed to parse {}: {}", location, e))
    })?;

    let mut units = Vec::with_capacity(document.units.len());
    for (index, value) in document.units.into_iter().enumerate() {
        let declaration = UnitDeclaration::deserialize(&value).map_err(|e| {
            StagehandError::Manifest(format!("Unit #{} in {}: {}", index, location, e))
        })?;
        if declaration.id.is_empty() {
            return Err(StagehandError::Manifest(format!(
                "Unit #{} in {} has an empty id",
                index, location
            )));
        }

        let data = serde_json::to_vec(&value)?;
        let mut unit = Unit::new(
            declaration.id,
            declaration.kind.unwrap_or_else(|| DEFAULT_UNIT_KIND.to_string()),
            Source::new(location.clone(), data, SourceFormat::Json),
        );
        unit.description = declaration.description;
        units.push(unit);
    }

    Ok(units)
}

/// Load every manifest. Unit IDs must be unique across all of them.
pub fn load_manifests(fs: &dyn FileSystem, manifests: &[DiscoveredManifest]) -> Result<Vec<Unit>> {
    let mut seen: HashSet<UnitId> = HashSet::new();
    let mut units = Vec::new();

    for manifest in manifests {
        for unit in load_manifest(fs, manifest)? {
            if !seen.insert(unit.id.clone()) {
                return Err(StagehandError::Manifest(format!(
                    "Duplicate unit '{}' in {}",
                    unit.id, unit.source.location
                )));
            }
            units.push(unit);
        }
    }

    tracing::debug!(
        "Loaded {} unit(s) from {} manifest(s)",
        units.len(),
        manifests.len()
    );

    Ok(units)
}

/// Reads `dependsOn` from JSON units.
#[derive(Debug, Default)]
pub struct DeclaredDependencyProvider;

impl DependencyProvider for DeclaredDependencyProvider {
    fn supports(&self, unit: &Unit) -> bool {
        unit.source.format == SourceFormat::Json
    }

    fn provide(&self, unit: &Unit) -> Result<Vec<UnitId>> {
        Ok(parse_declaration(unit)?
            .depends_on
            .into_iter()
            .map(UnitId::from)
            .collect())
    }
}

/// Emits the `files` declared by JSON units. Relative paths are resolved
/// against the manifest's directory.
#[derive(Debug, Default)]
pub struct FileUnitProcessor;

impl Processor for FileUnitProcessor {
    fn name(&self) -> &str {
        FILE_UNIT_PROCESSOR_NAME
    }

    fn process(&self, ctx: &CancellationToken, units: &[Unit]) -> Result<ArtifactList> {
        let mut artifacts = ArtifactList::new();

        for unit in units {
            ctx.check()?;
            if unit.source.format != SourceFormat::Json {
                continue;
            }

            let base = Path::new(&unit.source.location)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            for file in parse_declaration(unit)?.files {
                artifacts.push(std::sync::Arc::new(file.into_artifact(&base)?));
            }
        }

        Ok(artifacts)
    }
}
