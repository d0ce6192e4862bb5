// src/pool/mod.rs

//! Content-addressed package pool
//!
//! Package files are stored once per content, addressed by SHA-256:
//!
//! ```text
//! <root>/<sha[0..2]>/<sha[2..4]>/<sha[4..32]>_<basename>
//! ```
//!
//! Imports write into a temporary file next to the destination and publish
//! it with a no-clobber link, so readers never observe a partial file and
//! two imports of the same content settle on one stored copy. Several
//! mirrors may import into one pool at the same time.

use crate::collection::ChecksumStorage;
use crate::error::{Error, Result};
use crate::hash::ChecksumInfo;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Blob storage for package files
pub trait PackagePool: Send + Sync {
    /// Relative pool path for a file with the given checksums
    fn path_for(&self, basename: &str, checksums: &ChecksumInfo) -> Result<String>;

    /// Store `source` in the pool and return its pool path
    ///
    /// Checksums without a SHA-256 are computed from the file. With
    /// `move_file` the source is linked into place and removed. Importing
    /// content that is already stored is a no-op.
    fn import(
        &self,
        source: &Path,
        basename: &str,
        checksums: &ChecksumInfo,
        move_file: bool,
        storage: &dyn ChecksumStorage,
    ) -> Result<String>;

    /// Check whether the pool holds the file with `checksums`
    ///
    /// Returns the pool path and whether the stored file matches. A `None`
    /// path is derived from the checksums.
    fn verify(
        &self,
        pool_path: Option<&str>,
        basename: &str,
        checksums: &ChecksumInfo,
        storage: &dyn ChecksumStorage,
    ) -> Result<(String, bool)>;

    /// Absolute path of a pool path
    fn full_path(&self, pool_path: &str) -> PathBuf;

    /// Delete a stored file, returning its size
    fn remove(&self, pool_path: &str) -> Result<u64>;
}

/// Pool on the local filesystem
#[derive(Debug, Clone)]
pub struct FilePool {
    root: PathBuf,
}

impl FilePool {
    /// Open a pool rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root)?;
            debug!("Created package pool at {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Settle on an existing file at the destination
    fn adopt_existing(
        &self,
        pool_path: String,
        basename: &str,
        checksums: &ChecksumInfo,
        storage: &dyn ChecksumStorage,
    ) -> Result<String> {
        let (_, ok) = self.verify(Some(&pool_path), basename, checksums, storage)?;
        if ok {
            debug!("{} already in pool", pool_path);
            return Ok(pool_path);
        }
        Err(Error::IoError(format!(
            "unable to import {} into pool: {} exists with different content",
            basename, pool_path
        )))
    }

    fn publish_copy(&self, source: &Path, destination: &Path) -> io::Result<()> {
        let parent = destination.parent().unwrap_or(&self.root);
        let mut temp = NamedTempFile::new_in(parent)?;
        let mut input = fs::File::open(source)?;
        io::copy(&mut input, temp.as_file_mut())?;
        temp.as_file().sync_all()?;
        temp.persist_noclobber(destination).map_err(|e| e.error)?;
        Ok(())
    }
}

impl PackagePool for FilePool {
    fn path_for(&self, basename: &str, checksums: &ChecksumInfo) -> Result<String> {
        let sha256 = checksums
            .sha256
            .as_deref()
            .filter(|s| s.len() >= 32 && s.is_ascii())
            .ok_or_else(|| Error::NotFoundError(format!("SHA-256 checksum for {}", basename)))?;
        let sha256 = sha256.to_ascii_lowercase();
        Ok(format!(
            "{}/{}/{}_{}",
            &sha256[0..2],
            &sha256[2..4],
            &sha256[4..32],
            basename
        ))
    }

    fn import(
        &self,
        source: &Path,
        basename: &str,
        checksums: &ChecksumInfo,
        move_file: bool,
        storage: &dyn ChecksumStorage,
    ) -> Result<String> {
        let checksums = if checksums.complete() {
            checksums.clone()
        } else {
            ChecksumInfo::from_file(source).map_err(|e| {
                Error::IoError(format!("failed to checksum {}: {}", source.display(), e))
            })?
        };

        let pool_path = self.path_for(basename, &checksums)?;
        let destination = self.full_path(&pool_path);

        if destination.exists() {
            return self.adopt_existing(pool_path, basename, &checksums, storage);
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut published = false;
        if move_file {
            match fs::hard_link(source, &destination) {
                Ok(()) => {
                    published = true;
                    if let Err(e) = fs::remove_file(source) {
                        warn!("Failed to remove {} after import: {}", source.display(), e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return self.adopt_existing(pool_path, basename, &checksums, storage);
                }
                // Cross-device and similar failures fall back to copying
                Err(e) => debug!("Hard link into pool failed, copying: {}", e),
            }
        }

        if !published {
            match self.publish_copy(source, &destination) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return self.adopt_existing(pool_path, basename, &checksums, storage);
                }
                Err(e) => {
                    return Err(Error::IoError(format!(
                        "failed to import {} into pool: {}",
                        basename, e
                    )))
                }
            }
            if move_file {
                if let Err(e) = fs::remove_file(source) {
                    warn!("Failed to remove {} after import: {}", source.display(), e);
                }
            }
        }

        storage.update(&pool_path, &checksums)?;
        debug!("Imported {} into pool as {}", basename, pool_path);
        Ok(pool_path)
    }

    fn verify(
        &self,
        pool_path: Option<&str>,
        basename: &str,
        checksums: &ChecksumInfo,
        storage: &dyn ChecksumStorage,
    ) -> Result<(String, bool)> {
        let pool_path = match pool_path {
            Some(path) => path.to_string(),
            None => {
                if !checksums.complete() {
                    return Ok((String::new(), false));
                }
                self.path_for(basename, checksums)?
            }
        };

        let full = self.full_path(&pool_path);
        let metadata = match fs::metadata(&full) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((pool_path, false)),
            Err(e) => return Err(e.into()),
        };
        if metadata.len() != checksums.size {
            return Ok((pool_path, false));
        }

        let stored = match storage.get(&pool_path)? {
            Some(stored) if stored.complete() => stored,
            _ => {
                let computed = ChecksumInfo::from_file(&full)?;
                storage.update(&pool_path, &computed)?;
                computed
            }
        };

        Ok((pool_path, checksums.verify(&stored).is_ok()))
    }

    fn full_path(&self, pool_path: &str) -> PathBuf {
        self.root.join(pool_path)
    }

    fn remove(&self, pool_path: &str) -> Result<u64> {
        let full = self.full_path(pool_path);
        let size = fs::metadata(&full)?.len();
        fs::remove_file(&full)?;
        debug!("Removed {} from pool", pool_path);
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;

    fn write_source(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_path_layout() {
        let dir = tempfile::tempdir().unwrap();
        let pool = FilePool::new(dir.path().join("pool")).unwrap();
        let info = ChecksumInfo::from_bytes(b"hello world");
        assert_eq!(
            pool.path_for("hello.deb", &info).unwrap(),
            "b9/4d/27b9934d3e08a52e52d7da7dabfa_hello.deb"
        );
        assert!(pool.path_for("x.deb", &ChecksumInfo::default()).is_err());
    }

    #[test]
    fn test_import_copy_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let pool = FilePool::new(dir.path().join("pool")).unwrap();
        let storage = MemoryCollection::new();
        let source = write_source(dir.path(), "a.deb", b"package a");
        let info = ChecksumInfo::from_bytes(b"package a");

        let pool_path = pool.import(&source, "a.deb", &info, false, &storage).unwrap();
        assert!(source.exists());
        assert_eq!(fs::read(pool.full_path(&pool_path)).unwrap(), b"package a");
        assert_eq!(ChecksumStorage::get(&storage, &pool_path).unwrap(), Some(info.clone()));

        let (path, ok) = pool.verify(None, "a.deb", &info, &storage).unwrap();
        assert_eq!(path, pool_path);
        assert!(ok);

        let other = ChecksumInfo::from_bytes(b"package b");
        let (_, ok) = pool.verify(None, "a.deb", &other, &storage).unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_import_move() {
        let dir = tempfile::tempdir().unwrap();
        let pool = FilePool::new(dir.path().join("pool")).unwrap();
        let storage = MemoryCollection::new();
        let source = write_source(dir.path(), "b.deb", b"package b");

        let pool_path = pool
            .import(&source, "b.deb", &ChecksumInfo::default(), true, &storage)
            .unwrap();
        assert!(!source.exists());
        assert!(pool.full_path(&pool_path).exists());
    }

    #[test]
    fn test_import_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = FilePool::new(dir.path().join("pool")).unwrap();
        let storage = MemoryCollection::new();
        let source = write_source(dir.path(), "c.deb", b"package c");
        let info = ChecksumInfo::from_bytes(b"package c");

        let first = pool.import(&source, "c.deb", &info, false, &storage).unwrap();
        let second = pool.import(&source, "c.deb", &info, false, &storage).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_imports_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let pool = FilePool::new(dir.path().join("pool")).unwrap();
        let storage = MemoryCollection::new();
        let info = ChecksumInfo::from_bytes(b"shared content");
        let sources: Vec<PathBuf> = (0..8)
            .map(|i| write_source(dir.path(), &format!("src{}", i), b"shared content"))
            .collect();

        let paths: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = sources
                .iter()
                .map(|source| {
                    let (pool, storage, info) = (&pool, &storage, &info);
                    s.spawn(move || pool.import(source, "shared.deb", info, false, storage).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        let stored_dir = pool.full_path(&paths[0]);
        let entries = fs::read_dir(stored_dir.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_verify_missing_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pool = FilePool::new(dir.path().join("pool")).unwrap();
        let storage = MemoryCollection::new();
        let info = ChecksumInfo::from_bytes(b"package d");

        let (_, ok) = pool.verify(None, "d.deb", &info, &storage).unwrap();
        assert!(!ok);
        let (path, ok) = pool
            .verify(None, "d.deb", &ChecksumInfo::default(), &storage)
            .unwrap();
        assert!(path.is_empty() && !ok);

        let source = write_source(dir.path(), "d.deb", b"package d");
        let pool_path = pool.import(&source, "d.deb", &info, false, &storage).unwrap();
        assert_eq!(pool.remove(&pool_path).unwrap(), 9);
        assert!(!pool.full_path(&pool_path).exists());
    }
}
