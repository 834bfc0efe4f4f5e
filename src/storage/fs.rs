//! Filesystem seam used by the registry and the file-backed pool.
//!
//! Keeping directory scans, renames and removals behind a trait lets the
//! registry's suffix-and-rename commit protocol run against the real disk or
//! against [`MemoryFilesystem`], where a "crash" is just dropping the registry
//! and opening a new one over the same shared state.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Suffixes of companion files that directory scans never report.
pub const COMPANION_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

pub fn is_companion_file(name: &str) -> bool {
    COMPANION_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Path of the staging file a write goes through before it is renamed over
/// the real file.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("-wal");
    PathBuf::from(name)
}

pub trait Filesystem: Send + Sync {
    fn mkdir_all(&self, path: &Path) -> io::Result<()>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Call `f` with the name of every regular file directly inside `dir`,
    /// skipping companion files.
    fn for_each_file(
        &self,
        dir: &Path,
        f: &mut dyn FnMut(&str) -> io::Result<()>,
    ) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write `data` so that readers observe either the old or the new
    /// contents, never a torn file.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()>;
}

// ============================================================================
// OS filesystem
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct OsFilesystem;

impl OsFilesystem {
    pub fn new() -> Self {
        Self
    }

    fn sync_parent(path: &Path) -> io::Result<()> {
        #[cfg(unix)]
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }
}

impl Filesystem for OsFilesystem {
    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)?;
        Self::sync_parent(to)
    }

    fn for_each_file(
        &self,
        dir: &Path,
        f: &mut dyn FnMut(&str) -> io::Result<()>,
    ) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_companion_file(name) {
                continue;
            }
            f(name)?;
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)?;
        match fs::remove_file(staging_path(path)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Self::sync_parent(path),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let staging = staging_path(path);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&staging)?;
        file.write_all(data)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);
        fs::rename(&staging, path)?;
        Self::sync_parent(path)
    }
}

// ============================================================================
// In-memory filesystem
// ============================================================================

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    failing_renames: BTreeSet<PathBuf>,
    failing_removes: BTreeSet<PathBuf>,
}

/// Shared in-memory filesystem. Clones observe the same files.
#[derive(Clone, Default)]
pub struct MemoryFilesystem {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> io::Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))
    }

    /// Make every rename away from `from` fail until cleared.
    pub fn fail_renames_from(&self, from: impl Into<PathBuf>) {
        if let Ok(mut state) = self.state() {
            state.failing_renames.insert(from.into());
        }
    }

    /// Make every removal of `path` fail until cleared.
    pub fn fail_removes_of(&self, path: impl Into<PathBuf>) {
        if let Ok(mut state) = self.state() {
            state.failing_removes.insert(path.into());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state() {
            state.failing_renames.clear();
            state.failing_removes.clear();
        }
    }

    /// Sorted names of the files directly inside `dir`, companions included.
    pub fn file_names(&self, dir: impl AsRef<Path>) -> Vec<String> {
        let dir = dir.as_ref();
        let Ok(state) = self.state() else {
            return Vec::new();
        };
        state
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect()
    }

    /// Seed raw file contents, creating parent directories implicitly.
    pub fn insert_file(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        let path = path.into();
        if let Ok(mut state) = self.state() {
            if let Some(parent) = path.parent() {
                state.dirs.insert(parent.to_path_buf());
            }
            state.files.insert(path, data);
        }
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file", path.display()),
    )
}

impl Filesystem for MemoryFilesystem {
    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        let mut current = Some(path);
        while let Some(dir) = current.filter(|d| !d.as_os_str().is_empty()) {
            state.dirs.insert(dir.to_path_buf());
            current = dir.parent();
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        if state.failing_renames.contains(from) {
            return Err(io::Error::other(format!(
                "injected rename failure: {}",
                from.display()
            )));
        }
        let data = state.files.remove(from).ok_or_else(|| not_found(from))?;
        state.files.insert(to.to_path_buf(), data);
        Ok(())
    }

    fn for_each_file(
        &self,
        dir: &Path,
        f: &mut dyn FnMut(&str) -> io::Result<()>,
    ) -> io::Result<()> {
        let names: Vec<String> = {
            let state = self.state()?;
            if !state.dirs.contains(dir) {
                return Err(not_found(dir));
            }
            state
                .files
                .keys()
                .filter(|p| p.parent() == Some(dir))
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .filter(|n| !is_companion_file(n))
                .collect()
        };
        for name in &names {
            f(name)?;
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state()?;
        if state.failing_removes.contains(path) {
            return Err(io::Error::other(format!(
                "injected remove failure: {}",
                path.display()
            )));
        }
        state.files.remove(path).ok_or_else(|| not_found(path))?;
        state.files.remove(&staging_path(path));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.state()
            .map(|s| s.files.contains_key(path))
            .unwrap_or(false)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.state()?
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.state()?.files.insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }
}
