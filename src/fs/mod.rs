//! Narrow filesystem capability used by the artifact processors and manifest
//! discovery. Each call is atomic on its own; nothing spans calls.

mod local;
mod memory;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

/// Permission bits plus a directory flag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    pub const DIR: u32 = 1 << 31;
    pub const PERMISSIONS: u32 = 0o777;

    pub const DEFAULT_FILE: FileMode = FileMode(0o644);
    pub const DEFAULT_DIR: FileMode = FileMode(Self::DIR | 0o755);

    pub fn file(permissions: u32) -> Self {
        Self(permissions & Self::PERMISSIONS)
    }

    pub fn dir(permissions: u32) -> Self {
        Self(Self::DIR | (permissions & Self::PERMISSIONS))
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_dir(&self) -> bool {
        self.0 & Self::DIR != 0
    }

    pub fn permissions(&self) -> u32 {
        self.0 & Self::PERMISSIONS
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self::DEFAULT_FILE
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_dir() { "d" } else { "-" };
        write!(f, "FileMode({}{:o})", kind, self.permissions())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub mode: FileMode,
    pub len: u64,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }
}

pub trait FileSystem: Send + Sync {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create or truncate a file. The parent directory must exist.
    fn write_file(&self, path: &Path, data: &[u8], mode: FileMode) -> io::Result<()>;

    /// Create a single directory. The parent directory must exist.
    fn mkdir(&self, path: &Path, mode: FileMode) -> io::Result<()>;

    /// Remove a file, or a directory with everything below it.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// `None` when nothing exists at `path`.
    fn stat(&self, path: &Path) -> io::Result<Option<FileInfo>>;

    /// Every entry below `root`, sorted by path. `root` itself is not included.
    fn walk_dir(&self, root: &Path) -> io::Result<Vec<FileInfo>> {
        self.walk_dir_filtered(root, &|_| false)
    }

    /// Like [`FileSystem::walk_dir`], but entries for which `prune` returns
    /// true are left out and never descended into.
    fn walk_dir_filtered(
        &self,
        root: &Path,
        prune: &dyn Fn(&Path) -> bool,
    ) -> io::Result<Vec<FileInfo>>;

    fn abs(&self, path: &Path) -> io::Result<PathBuf>;

    fn rel(&self, base: &Path, target: &Path) -> io::Result<PathBuf>;
}

pub(crate) fn relative_to(base: &Path, target: &Path) -> io::Result<PathBuf> {
    target.strip_prefix(base).map(Path::to_path_buf).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} is not below {}",
                target.display(),
                base.display()
            ),
        )
    })
}
