// tests/common/mod.rs

//! Shared fixtures for integration tests: packages, an archive served from
//! a local directory and a fixed mirror index.

#![allow(dead_code)]

use aptly::hash::ChecksumInfo;
use aptly::repository::{Cancellation, Downloader, Mirror, MirrorSource};
use aptly::{Error, Package, PackageFile, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ARCHIVE_ROOT: &str = "http://archive.test/debian/";

/// Route crate logs to the test output, filtered by `RUST_LOG`
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Package without files
pub fn package(name: &str, version: &str, arch: &str) -> Package {
    Package::new(name, version, arch).unwrap()
}

/// Package with `Depends`
pub fn package_depending(name: &str, version: &str, arch: &str, depends: &str) -> Package {
    package(name, version, arch).with_depends(depends).unwrap()
}

/// Package with one `.deb` file holding `content`
pub fn package_with_file(name: &str, version: &str, arch: &str, content: &[u8]) -> Package {
    package(name, version, arch).with_file(PackageFile::new(
        deb_filename(name, version, arch),
        pool_dir(name),
        ChecksumInfo::from_bytes(content),
    ))
}

pub fn deb_filename(name: &str, version: &str, arch: &str) -> String {
    format!("{}_{}_{}.deb", name, version, arch)
}

pub fn pool_dir(name: &str) -> String {
    format!("pool/main/{}/{}", &name[..1], name)
}

/// Downloader serving files from a local archive directory
///
/// URLs under [`ARCHIVE_ROOT`] map onto paths under the directory. URLs
/// listed in `broken` always fail with a transient error.
pub struct DirectoryDownloader {
    root: PathBuf,
    broken: Vec<String>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl DirectoryDownloader {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            broken: Vec::new(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_broken(mut self, url: impl Into<String>) -> Self {
        self.broken.push(url.into());
        self
    }

    /// Write `content` into the archive at the package's file path
    pub fn publish(&self, package: &Package, content: &[u8]) {
        for file in package.files() {
            let path = self.root.join(file.download_url_path());
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    pub fn attempts(&self, url: &str) -> u32 {
        self.attempts.lock().get(url).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.lock().values().sum()
    }
}

impl Downloader for DirectoryDownloader {
    fn download(&self, cancel: &Cancellation, url: &str, dest: &Path) -> Result<()> {
        cancel.check()?;
        *self.attempts.lock().entry(url.to_string()).or_insert(0) += 1;
        if self.broken.iter().any(|u| u == url) {
            return Err(Error::DownloadError(format!("HTTP 503 from {}", url)));
        }
        let relative = url
            .strip_prefix(ARCHIVE_ROOT)
            .ok_or_else(|| Error::DownloadError(format!("unknown host in {}", url)))?;
        let source = self.root.join(relative);
        if !source.exists() {
            return Err(Error::DownloadError(format!("HTTP 404 from {}", url)));
        }
        fs::copy(source, dest)?;
        Ok(())
    }

    fn download_with_checksum(
        &self,
        cancel: &Cancellation,
        url: &str,
        dest: &Path,
        expected: &ChecksumInfo,
        ignore_mismatch: bool,
    ) -> Result<()> {
        self.download(cancel, url, dest)?;
        let actual = ChecksumInfo::from_file(dest)?;
        match expected.verify(&actual) {
            Err(m) if !ignore_mismatch => Err(Error::ChecksumMismatch {
                path: url.to_string(),
                expected: m.expected,
                actual: m.actual,
            }),
            _ => Ok(()),
        }
    }
}

/// Remote index with a fixed package set
pub struct StaticSource {
    pub packages: Vec<Package>,
}

impl MirrorSource for StaticSource {
    fn fetch(
        &self,
        _mirror: &Mirror,
        _downloader: &dyn Downloader,
        cancel: &Cancellation,
        _ignore_signatures: bool,
    ) -> Result<Vec<Package>> {
        cancel.check()?;
        Ok(self.packages.clone())
    }
}
