use std::path::{Path, PathBuf};

use crate::fs::FileSystem;

/// File name suffix identifying a unit manifest.
pub const MANIFEST_SUFFIX: &str = ".stagehand.json";

// Directories to exclude from manifest discovery
const EXCLUDED_DIRS: &[&str] = &["node_modules", "dist", "build", ".git", "target"];

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredManifest {
    pub path: PathBuf,
    pub name: String,
}

impl DiscoveredManifest {
    /// Get the relative path from a base directory
    pub fn relative_path(&self, base: &Path) -> Option<PathBuf> {
        self.path.strip_prefix(base).ok().map(|p| p.to_path_buf())
    }
}

// Hidden entries and excluded directories are pruned before descending
fn is_pruned(path: &Path) -> bool {
    path.file_name()
        .map(|name| {
            let name = name.to_string_lossy();
            name.starts_with('.') || EXCLUDED_DIRS.contains(&name.as_ref())
        })
        .unwrap_or(false)
}

pub fn discover_manifests(
    fs: &dyn FileSystem,
    dir: &Path,
) -> Result<Vec<DiscoveredManifest>, std::io::Error> {
    let dir = fs.abs(dir)?;

    let mut manifests = Vec::new();
    for entry in fs.walk_dir_filtered(&dir, &is_pruned)? {
        if entry.is_dir() {
            continue;
        }

        let Some(file_name) = entry.path.file_name() else {
            continue;
        };
        let file_name = file_name.to_string_lossy();
        if let Some(name) = file_name.strip_suffix(MANIFEST_SUFFIX) {
            if !name.is_empty() {
                manifests.push(DiscoveredManifest {
                    name: name.to_string(),
                    path: entry.path.clone(),
                });
            }
        }
    }

    tracing::debug!(
        "Discovered {} manifest(s) in {}",
        manifests.len(),
        dir.display()
    );

    Ok(manifests)
}
