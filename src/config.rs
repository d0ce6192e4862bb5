// src/config.rs
//! Configuration file parsing
//!
//! Settings come from a flat TOML file; every key is optional:
//!
//! ```toml
//! root_dir = "/var/lib/aptly"
//! download_concurrency = 8
//! architectures = ["amd64", "arm64"]
//! dependency_follow_recommends = true
//! ```

use crate::error::{Error, Result};
use crate::package::DependencyOptions;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding the database and package pool
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Number of concurrent download workers
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    /// Attempts per download before giving up
    #[serde(default = "default_download_retries")]
    pub download_retries: u32,

    /// Base delay between attempts, multiplied by the attempt number
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Architectures to resolve for; empty derives them from the packages
    #[serde(default)]
    pub architectures: Vec<String>,

    #[serde(default)]
    pub dependency_follow_suggests: bool,

    #[serde(default)]
    pub dependency_follow_recommends: bool,

    #[serde(default)]
    pub dependency_follow_all_variants: bool,

    #[serde(default)]
    pub dependency_follow_source: bool,

    #[serde(default)]
    pub dependency_follow_build: bool,

    /// Skip signature verification of fetched indexes
    #[serde(default)]
    pub gpg_disable_verify: bool,

    /// Mirror source packages even when the mirror does not ask for them
    #[serde(default)]
    pub download_source_packages: bool,

    /// Keep packages already in the pool out of the download queue
    /// without re-hashing them
    #[serde(default)]
    pub skip_existing_packages: bool,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/var/lib/aptly")
}

fn default_download_concurrency() -> usize {
    4
}

fn default_download_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            download_concurrency: default_download_concurrency(),
            download_retries: default_download_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            architectures: Vec::new(),
            dependency_follow_suggests: false,
            dependency_follow_recommends: false,
            dependency_follow_all_variants: false,
            dependency_follow_source: false,
            dependency_follow_build: false,
            gpg_disable_verify: false,
            download_source_packages: false,
            skip_existing_packages: false,
        }
    }
}

/// Renders one configuration value for [`Config::dump`]
type Accessor = fn(&Config) -> String;

fn flag(value: bool) -> String {
    value.to_string()
}

impl Config {
    /// Every setting with its accessor, in file order
    pub const FIELDS: &'static [(&'static str, Accessor)] = &[
        ("root_dir", |c| c.root_dir.display().to_string()),
        ("download_concurrency", |c| c.download_concurrency.to_string()),
        ("download_retries", |c| c.download_retries.to_string()),
        ("retry_delay_ms", |c| c.retry_delay_ms.to_string()),
        ("architectures", |c| format!("{:?}", c.architectures)),
        ("dependency_follow_suggests", |c| flag(c.dependency_follow_suggests)),
        ("dependency_follow_recommends", |c| flag(c.dependency_follow_recommends)),
        ("dependency_follow_all_variants", |c| flag(c.dependency_follow_all_variants)),
        ("dependency_follow_source", |c| flag(c.dependency_follow_source)),
        ("dependency_follow_build", |c| flag(c.dependency_follow_build)),
        ("gpg_disable_verify", |c| flag(c.gpg_disable_verify)),
        ("download_source_packages", |c| flag(c.download_source_packages)),
        ("skip_existing_packages", |c| flag(c.skip_existing_packages)),
    ];

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::ConfigurationError(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)
            .map_err(|e| Error::ConfigurationError(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.download_concurrency == 0 {
            return Err(Error::ConfigurationError(
                "download_concurrency must be at least 1".to_string(),
            ));
        }
        if self.download_retries == 0 {
            return Err(Error::ConfigurationError(
                "download_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pool_dir(&self) -> PathBuf {
        self.root_dir.join("pool")
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_dir.join("db").join("aptly.db")
    }

    /// Dependency edges to follow during closure and verification
    pub fn dependency_options(&self) -> DependencyOptions {
        DependencyOptions {
            follow_recommends: self.dependency_follow_recommends,
            follow_suggests: self.dependency_follow_suggests,
            follow_source: self.dependency_follow_source,
            follow_build: self.dependency_follow_build,
            follow_all_variants: self.dependency_follow_all_variants,
        }
    }

    /// `name = value` line per setting
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (name, accessor) in Self::FIELDS {
            let _ = writeln!(out, "{} = {}", name, accessor(self));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.download_concurrency, 4);
        assert_eq!(config.download_retries, 3);
        assert_eq!(config.pool_dir(), PathBuf::from("/var/lib/aptly/pool"));
    }

    #[test]
    fn test_parse_values() {
        let config = Config::from_toml(
            r#"
            root_dir = "/srv/aptly"
            download_concurrency = 8
            architectures = ["amd64", "arm64"]
            dependency_follow_recommends = true
            dependency_follow_all_variants = true
            "#,
        )
        .unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/srv/aptly"));
        assert_eq!(config.architectures, vec!["amd64", "arm64"]);
        let opts = config.dependency_options();
        assert!(opts.follow_recommends);
        assert!(opts.follow_all_variants);
        assert!(!opts.follow_suggests);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Config::from_toml("download_concurrency = 0"),
            Err(Error::ConfigurationError(_))
        ));
        assert!(matches!(
            Config::from_toml("unknown_key = 1"),
            Err(Error::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aptly.toml");
        fs::write(&path, "download_retries = 5\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().download_retries, 5);
        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_dump_lists_every_field() {
        let dump = Config::default().dump();
        assert_eq!(dump.lines().count(), Config::FIELDS.len());
        assert!(dump.contains("download_concurrency = 4\n"));
        assert!(dump.contains("architectures = []\n"));
        assert!(dump.contains("skip_existing_packages = false\n"));
    }
}
