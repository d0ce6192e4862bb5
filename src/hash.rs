// src/hash.rs

//! Checksums for package files
//!
//! Debian indexes publish several digests per file. [`ChecksumInfo`] carries
//! the size plus every digest known for a file, and [`ChecksumWriter`]
//! computes all of them in a single streaming pass so a download can be
//! verified while it is being written.
//!
//! | Algorithm | Used for |
//! |-----------|----------|
//! | MD5 | legacy `Packages` fields |
//! | SHA-256 | pool addressing, primary verification |
//! | SHA-512 | strongest index checksum |

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;

/// Buffer size for streaming hashes (64 KB)
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hash algorithms carried by [`ChecksumInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Get the algorithm name as a string
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Size and digests of one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChecksumInfo {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
}

/// First difference found between expected and actual checksums
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumMismatch {
    /// What differed: `size` or an algorithm name
    pub kind: &'static str,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mismatch: expected {}, got {}",
            self.kind, self.expected, self.actual
        )
    }
}

impl ChecksumInfo {
    /// Checksums with only a known SHA-256 and size
    pub fn with_sha256(size: u64, sha256: impl Into<String>) -> Self {
        Self {
            size,
            sha256: Some(sha256.into().to_lowercase()),
            ..Default::default()
        }
    }

    /// Whether enough is known to address the file in the pool
    pub fn complete(&self) -> bool {
        self.sha256.is_some()
    }

    /// Value for an algorithm, if known
    pub fn get(&self, algorithm: HashAlgorithm) -> Option<&str> {
        match algorithm {
            HashAlgorithm::Md5 => self.md5.as_deref(),
            HashAlgorithm::Sha256 => self.sha256.as_deref(),
            HashAlgorithm::Sha512 => self.sha512.as_deref(),
        }
    }

    /// Compare `self` (expected) against `actual`
    ///
    /// The size always participates; a digest participates when both sides
    /// know it.
    pub fn verify(&self, actual: &ChecksumInfo) -> std::result::Result<(), ChecksumMismatch> {
        if self.size != actual.size {
            return Err(ChecksumMismatch {
                kind: "size",
                expected: self.size.to_string(),
                actual: actual.size.to_string(),
            });
        }

        for algorithm in [HashAlgorithm::Md5, HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            if let (Some(expected), Some(got)) = (self.get(algorithm), actual.get(algorithm)) {
                if !expected.eq_ignore_ascii_case(got) {
                    return Err(ChecksumMismatch {
                        kind: algorithm.name(),
                        expected: expected.to_string(),
                        actual: got.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Compute every supported checksum of a reader
    pub fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut writer = ChecksumWriter::new(io::sink());
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n])?;
        }
        Ok(writer.finish().1)
    }

    /// Compute every supported checksum of a file
    ///
    /// Streams the file content to avoid loading it entirely into memory.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        Self::from_reader(&mut file)
    }

    /// Compute every supported checksum of a byte slice
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut writer = ChecksumWriter::new(io::sink());
        // Writing to a sink cannot fail
        let _ = writer.write_all(data);
        writer.finish().1
    }
}

/// Writer adapter that hashes everything passing through it
pub struct ChecksumWriter<W: Write> {
    inner: W,
    size: u64,
    md5: Md5,
    sha256: Sha256,
    sha512: Sha512,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            size: 0,
            md5: Md5::new(),
            sha256: Sha256::new(),
            sha512: Sha512::new(),
        }
    }

    /// Finish hashing, returning the inner writer and the checksums
    pub fn finish(self) -> (W, ChecksumInfo) {
        let info = ChecksumInfo {
            size: self.size,
            md5: Some(hex::encode(self.md5.finalize())),
            sha256: Some(hex::encode(self.sha256.finalize())),
            sha512: Some(hex::encode(self.sha512.finalize())),
        };
        (self.inner, info)
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.md5.update(&buf[..n]);
        self.sha256.update(&buf[..n]);
        self.sha512.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
