//! Data-directory backend for the durability layer.
//!
//! The engine keeps a flat directory of a handful of well-known files
//! (`wal.log`, `wal.new`, `snapshot.json`). `DataDir` exposes exactly the
//! operations those files need: streaming reads, appending writes, atomic
//! replacement, an atomic rename, and explicit stable-storage barriers.
//!
//! Atomicity and durability are distinct: a rename is atomic on its own,
//! but surviving power loss additionally needs the file's contents synced
//! and, for creates/renames, the directory synced so the *name* survives.
//! The operations here bundle the barriers their callers always want:
//! [`DataDir::replace`] and [`DataDir::promote`] are durable as a unit,
//! while [`DataDir::persist`] serves the append path, where group commit
//! decides when to pay for the fsync.

use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Flat-file storage under a single data directory.
///
/// Names are plain file names, never paths. Each backend decides what the
/// durability barriers mean: the filesystem backend issues real `fsync`s;
/// the in-memory test backend has no storage weaker than its own lifetime,
/// so its barriers are trivially satisfied.
pub trait DataDir: Send + Sync {
    /// Stream an existing file from the start.
    fn reader(&self, name: &str) -> EngineResult<Box<dyn Read + Send>>;

    /// Open a file for appending, creating it empty if missing.
    ///
    /// Bytes become readable at the writer's `flush()` boundary and durable
    /// only after [`DataDir::persist`].
    fn appender(&self, name: &str) -> EngineResult<Box<dyn Write + Send>>;

    /// Atomically replace a file's contents, durable once this returns.
    ///
    /// The bytes go to a sibling `<name>.tmp`, reach stable storage, and
    /// only then take over the name; a crash leaves either the old file or
    /// the new one, never a mix.
    fn replace(&self, name: &str, bytes: &[u8]) -> EngineResult<()>;

    /// Atomically rename `from` over `to` and make the new name durable.
    fn promote(&self, from: &str, to: &str) -> EngineResult<()>;

    /// Delete a file. Missing files are fine.
    fn remove(&self, name: &str) -> EngineResult<()>;

    /// Whether the file exists.
    fn exists(&self, name: &str) -> bool;

    /// Byte length of the file (0 when missing).
    fn len(&self, name: &str) -> u64;

    /// Force the file's current contents to stable storage.
    fn persist(&self, name: &str) -> EngineResult<()>;
}

/// Filesystem-backed data directory.
pub struct FsDataDir {
    root: PathBuf,
}

impl FsDataDir {
    /// Open (creating if needed) a data directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    // Sync the directory itself so a create or rename survives power loss.
    // Not every platform can: Windows has no directory handles to sync, and
    // some filesystems answer ENOTSUP. The rename was already atomic, so
    // those answers are accepted rather than failing the operation.
    fn persist_root(&self) -> EngineResult<()> {
        if cfg!(windows) {
            return Ok(());
        }
        let dir = std::fs::File::open(&self.root)?;
        match dir.sync_all() {
            Ok(()) => Ok(()),
            Err(e) if dir_sync_unsupported(&e) => {
                tracing::debug!(root = %self.root.display(), error = %e,
                    "directory fsync unsupported; name durability is best effort");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ENOTSUP (Linux 95, macOS 45) or the generic Unsupported kind.
fn dir_sync_unsupported(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::Unsupported
        || matches!(e.raw_os_error(), Some(95) | Some(45))
}

impl DataDir for FsDataDir {
    fn reader(&self, name: &str) -> EngineResult<Box<dyn Read + Send>> {
        let path = self.file(name);
        if !path.exists() {
            return Err(EngineError::MissingPath(path));
        }
        Ok(Box::new(std::fs::File::open(path)?))
    }

    fn appender(&self, name: &str) -> EngineResult<Box<dyn Write + Send>> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file(name))?;
        Ok(Box::new(file))
    }

    fn replace(&self, name: &str, bytes: &[u8]) -> EngineResult<()> {
        let tmp_name = format!("{name}.tmp");
        let tmp = self.file(&tmp_name);
        let write_synced = (|| -> EngineResult<()> {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            Ok(())
        })();
        if let Err(e) = write_synced {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        if let Err(e) = std::fs::rename(&tmp, self.file(name)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        self.persist_root()
    }

    fn promote(&self, from: &str, to: &str) -> EngineResult<()> {
        std::fs::rename(self.file(from), self.file(to))?;
        self.persist_root()
    }

    fn remove(&self, name: &str) -> EngineResult<()> {
        let path = self.file(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.file(name).exists()
    }

    fn len(&self, name: &str) -> u64 {
        std::fs::metadata(self.file(name))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn persist(&self, name: &str) -> EngineResult<()> {
        let f = std::fs::OpenOptions::new().read(true).open(self.file(name))?;
        f.sync_all()?;
        Ok(())
    }
}

type SharedFiles = Arc<RwLock<HashMap<String, Vec<u8>>>>;

/// In-memory data directory for tests.
///
/// Clones share the same files, which lets a test keep a handle while the
/// engine owns another. `fork` is the crash lever: it deep-copies the
/// current contents into an independent directory, a point-in-time disk
/// image that later writes cannot touch.
#[derive(Clone, Default)]
pub struct MemDataDir {
    files: SharedFiles,
}

impl MemDataDir {
    /// Create an empty in-memory directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep-copy the current contents into an independent directory.
    pub fn fork(&self) -> EngineResult<MemDataDir> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        Ok(MemDataDir {
            files: Arc::new(RwLock::new(files.clone())),
        })
    }

    fn poisoned() -> EngineError {
        EngineError::LockFailed {
            resource: "in-memory data directory".to_string(),
            reason: "lock poisoned".to_string(),
        }
    }
}

impl DataDir for MemDataDir {
    fn reader(&self, name: &str) -> EngineResult<Box<dyn Read + Send>> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        let bytes = files
            .get(name)
            .ok_or_else(|| EngineError::MissingPath(PathBuf::from(name)))?
            .clone();
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    fn appender(&self, name: &str) -> EngineResult<Box<dyn Write + Send>> {
        self.files
            .write()
            .map_err(|_| Self::poisoned())?
            .entry(name.to_string())
            .or_default();
        Ok(Box::new(MemWriter {
            files: self.files.clone(),
            name: name.to_string(),
            buf: Vec::new(),
        }))
    }

    fn replace(&self, name: &str, bytes: &[u8]) -> EngineResult<()> {
        self.files
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn promote(&self, from: &str, to: &str) -> EngineResult<()> {
        let mut files = self.files.write().map_err(|_| Self::poisoned())?;
        let bytes = files
            .remove(from)
            .ok_or_else(|| EngineError::MissingPath(PathBuf::from(from)))?;
        files.insert(to.to_string(), bytes);
        Ok(())
    }

    fn remove(&self, name: &str) -> EngineResult<()> {
        self.files
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.files
            .read()
            .map(|f| f.contains_key(name))
            .unwrap_or(false)
    }

    fn len(&self, name: &str) -> u64 {
        self.files
            .read()
            .map(|f| f.get(name).map(|b| b.len() as u64).unwrap_or(0))
            .unwrap_or(0)
    }

    fn persist(&self, _name: &str) -> EngineResult<()> {
        Ok(())
    }
}

// Models the userspace-buffer / visible-file boundary: written bytes land
// in the shared map only at flush (or drop), the way an OS file becomes
// readable at the writer's flush boundary.
struct MemWriter {
    files: SharedFiles,
    name: String,
    buf: Vec<u8>,
}

impl Write for MemWriter {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let mut files = self
            .files
            .write()
            .map_err(|_| std::io::Error::other("lock poisoned"))?;
        files
            .entry(self.name.clone())
            .or_default()
            .append(&mut self.buf);
        Ok(())
    }
}

impl Drop for MemWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
