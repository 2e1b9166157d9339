use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use super::{FileInfo, FileMode, FileSystem, relative_to};

/// [`FileSystem`] backed by the local disk.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    base_dir: Option<PathBuf>,
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `base_dir` instead of the current directory.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn expand_tilde(path: &Path) -> PathBuf {
        if let Some(path_str) = path.to_str() {
            if let Some(stripped) = path_str.strip_prefix("~/") {
                if let Some(home) = dirs::home_dir() {
                    return home.join(stripped);
                }
            }
        }
        path.to_path_buf()
    }

    fn info(path: &Path, metadata: &fs::Metadata) -> FileInfo {
        #[cfg(unix)]
        let permissions = metadata.permissions().mode();
        #[cfg(not(unix))]
        let permissions = if metadata.permissions().readonly() { 0o444 } else { 0o644 };

        let mode = if metadata.is_dir() {
            FileMode::dir(permissions)
        } else {
            FileMode::file(permissions)
        };

        FileInfo {
            path: path.to_path_buf(),
            mode,
            len: metadata.len(),
        }
    }

    #[cfg(unix)]
    fn set_permissions(path: &Path, mode: FileMode) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode.permissions()))
    }

    #[cfg(not(unix))]
    fn set_permissions(_path: &Path, _mode: FileMode) -> io::Result<()> {
        Ok(())
    }

    fn walk_recursive(
        dir: &Path,
        prune: &dyn Fn(&Path) -> bool,
        found: &mut Vec<FileInfo>,
    ) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if prune(&path) {
                continue;
            }

            // Dangling symlinks are reported as the link itself
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => fs::symlink_metadata(&path)?,
                Err(e) => return Err(e),
            };
            found.push(Self::info(&path, &metadata));

            if metadata.is_dir() {
                Self::walk_recursive(&path, prune, found)?;
            }
        }
        Ok(())
    }
}

impl FileSystem for LocalFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: FileMode) -> io::Result<()> {
        fs::write(path, data)?;
        Self::set_permissions(path, mode)
    }

    fn mkdir(&self, path: &Path, mode: FileMode) -> io::Result<()> {
        fs::create_dir(path)?;
        Self::set_permissions(path, mode)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if fs::symlink_metadata(path)?.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn stat(&self, path: &Path) -> io::Result<Option<FileInfo>> {
        match fs::metadata(path) {
            Ok(metadata) => Ok(Some(Self::info(path, &metadata))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn walk_dir_filtered(
        &self,
        root: &Path,
        prune: &dyn Fn(&Path) -> bool,
    ) -> io::Result<Vec<FileInfo>> {
        let mut found = Vec::new();
        Self::walk_recursive(root, prune, &mut found)?;
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    fn abs(&self, path: &Path) -> io::Result<PathBuf> {
        let path = Self::expand_tilde(path);
        let path = if path.is_absolute() {
            path
        } else {
            let base = match &self.base_dir {
                Some(base) => base.clone(),
                None => std::env::current_dir()?,
            };
            base.join(path)
        };

        // Drop `.` segments so "./x" and "x" name the same artifact
        Ok(path
            .components()
            .filter(|component| !matches!(component, Component::CurDir))
            .collect())
    }

    fn rel(&self, base: &Path, target: &Path) -> io::Result<PathBuf> {
        relative_to(&self.abs(base)?, &self.abs(target)?)
    }
}
