use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use super::{FileInfo, FileMode, FileSystem, relative_to};

#[derive(Debug, Clone)]
struct MemoryEntry {
    data: Vec<u8>,
    mode: FileMode,
}

/// In-process [`FileSystem`]. Starts with an empty root directory `/`.
#[derive(Debug)]
pub struct MemoryFileSystem {
    base_dir: PathBuf,
    entries: RwLock<BTreeMap<PathBuf, MemoryEntry>>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            PathBuf::from("/"),
            MemoryEntry {
                data: Vec::new(),
                mode: FileMode::DEFAULT_DIR,
            },
        );
        Self {
            base_dir: PathBuf::from("/"),
            entries: RwLock::new(entries),
        }
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths of every file and directory, root excluded.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|path| path.as_path() != Path::new("/"))
            .cloned()
            .collect()
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )
    }

    fn check_parent(entries: &BTreeMap<PathBuf, MemoryEntry>, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) => match entries.get(parent) {
                Some(entry) if entry.mode.is_dir() => Ok(()),
                Some(_) => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a directory", parent.display()),
                )),
                None => Err(Self::not_found(parent)),
            },
            None => Ok(()),
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(path) {
            Some(entry) if !entry.mode.is_dir() => Ok(entry.data.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            )),
            None => Err(Self::not_found(path)),
        }
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: FileMode) -> io::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Self::check_parent(&entries, path)?;
        if entries.get(path).is_some_and(|entry| entry.mode.is_dir()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            ));
        }
        entries.insert(
            path.to_path_buf(),
            MemoryEntry {
                data: data.to_vec(),
                mode: FileMode::file(mode.permissions()),
            },
        );
        Ok(())
    }

    fn mkdir(&self, path: &Path, mode: FileMode) -> io::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            ));
        }
        Self::check_parent(&entries, path)?;
        entries.insert(
            path.to_path_buf(),
            MemoryEntry {
                data: Vec::new(),
                mode: FileMode::dir(mode.permissions()),
            },
        );
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(path) {
            return Err(Self::not_found(path));
        }
        entries.retain(|existing, _| !existing.starts_with(path));
        Ok(())
    }

    fn stat(&self, path: &Path) -> io::Result<Option<FileInfo>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(path).map(|entry| FileInfo {
            path: path.to_path_buf(),
            mode: entry.mode,
            len: entry.data.len() as u64,
        }))
    }

    fn walk_dir_filtered(
        &self,
        root: &Path,
        prune: &dyn Fn(&Path) -> bool,
    ) -> io::Result<Vec<FileInfo>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(root) {
            Some(entry) if entry.mode.is_dir() => {}
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a directory", root.display()),
                ));
            }
            None => return Err(Self::not_found(root)),
        }

        Ok(entries
            .iter()
            .filter(|(path, _)| path.starts_with(root) && path.as_path() != root)
            .filter(|(path, _)| {
                // Pruning an entry hides everything below it
                !path
                    .ancestors()
                    .take_while(|ancestor| *ancestor != root)
                    .any(|ancestor| prune(ancestor))
            })
            .map(|(path, entry)| FileInfo {
                path: path.clone(),
                mode: entry.mode,
                len: entry.data.len() as u64,
            })
            .collect())
    }

    fn abs(&self, path: &Path) -> io::Result<PathBuf> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.base_dir.join(path))
        }
    }

    fn rel(&self, base: &Path, target: &Path) -> io::Result<PathBuf> {
        relative_to(&self.abs(base)?, &self.abs(target)?)
    }
}
