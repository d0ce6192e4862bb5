// src/repository/client.rs

//! HTTP downloads
//!
//! [`Downloader`] is the seam the sync pipeline downloads through;
//! [`RepositoryClient`] implements it over a blocking reqwest client.
//! Downloads stream into a temporary file beside the destination while
//! hashing, and are renamed into place only after the checksum matches.

use crate::error::{Error, Result};
use crate::hash::{ChecksumInfo, ChecksumWriter};
use reqwest::blocking::Client;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::workers::Cancellation;

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Fetches remote files to local paths
pub trait Downloader: Send + Sync {
    /// Download `url` to `dest`
    fn download(&self, cancel: &Cancellation, url: &str, dest: &Path) -> Result<()>;

    /// Download `url` to `dest`, checking the content against `expected`
    ///
    /// A mismatch fails the download unless `ignore_mismatch` is set, in
    /// which case it is only logged. `dest` is left untouched on failure.
    fn download_with_checksum(
        &self,
        cancel: &Cancellation,
        url: &str,
        dest: &Path,
        expected: &ChecksumInfo,
        ignore_mismatch: bool,
    ) -> Result<()>;
}

/// HTTP downloader
pub struct RepositoryClient {
    client: Client,
}

impl RepositoryClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("aptly/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ConfigurationError(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn fetch(
        &self,
        cancel: &Cancellation,
        url: &str,
        dest: &Path,
        expected: Option<&ChecksumInfo>,
        ignore_mismatch: bool,
    ) -> Result<ChecksumInfo> {
        cancel.check()?;
        debug!("Downloading {} to {}", url, dest.display());

        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| {
            Error::IoError(format!("failed to create directory {}: {e}", parent.display()))
        })?;

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("failed to fetch {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let temp = NamedTempFile::new_in(parent)?;
        let mut writer = ChecksumWriter::new(temp);
        let mut buffer = [0u8; STREAM_BUFFER_SIZE];
        loop {
            cancel.check()?;
            let n = response
                .read(&mut buffer)
                .map_err(|e| Error::DownloadError(format!("failed to read {url}: {e}")))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buffer[..n])
                .map_err(|e| Error::IoError(format!("failed to write download data: {e}")))?;
        }
        let (temp, actual) = writer.finish();

        if let Some(expected) = expected {
            if let Err(mismatch) = expected.verify(&actual) {
                if !ignore_mismatch {
                    return Err(Error::ChecksumMismatch {
                        path: url.to_string(),
                        expected: mismatch.expected,
                        actual: mismatch.actual,
                    });
                }
                warn!("Ignoring checksum mismatch for {}: {}", url, mismatch);
            }
        }

        temp.persist(dest).map_err(|e| {
            Error::IoError(format!("failed to move download to {}: {}", dest.display(), e.error))
        })?;
        debug!("Downloaded {} bytes from {}", actual.size, url);
        Ok(actual)
    }
}

impl Downloader for RepositoryClient {
    fn download(&self, cancel: &Cancellation, url: &str, dest: &Path) -> Result<()> {
        self.fetch(cancel, url, dest, None, false).map(|_| ())
    }

    fn download_with_checksum(
        &self,
        cancel: &Cancellation,
        url: &str,
        dest: &Path,
        expected: &ChecksumInfo,
        ignore_mismatch: bool,
    ) -> Result<()> {
        self.fetch(cancel, url, dest, Some(expected), ignore_mismatch)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(RepositoryClient::new().is_ok());
    }

    #[test]
    fn test_cancelled_before_request() {
        let client = RepositoryClient::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cancel = Cancellation::new();
        cancel.cancel();
        let dest = dir.path().join("file");
        let result = client.download(&cancel, "http://127.0.0.1:9/file", &dest);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!dest.exists());
    }

    #[test]
    fn test_connection_failure_is_retryable() {
        let client = RepositoryClient::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        // Port 9 (discard) is not expected to accept HTTP connections
        let err = client
            .download(&Cancellation::new(), "http://127.0.0.1:9/file", &dir.path().join("file"))
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected error {err}");
    }
}
