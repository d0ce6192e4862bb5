// src/collection/mod.rs

//! Storage interfaces for package metadata and pool checksums
//!
//! The core never talks to a database directly. Reference lists are
//! resolved through [`PackageCollection`], and the pool records computed
//! checksums through [`ChecksumStorage`]. [`MemoryCollection`] implements
//! both for tests and short-lived runs; [`crate::db::Database`] persists them.

use crate::error::{Error, Result};
use crate::hash::ChecksumInfo;
use crate::package::{Package, PackageRef};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Package metadata keyed by [`PackageRef`]
pub trait PackageCollection: Send + Sync {
    /// Look up a package, failing with `NotFoundError` for unknown keys
    fn get(&self, key: &PackageRef) -> Result<Package>;

    /// Insert or replace a package under its own key
    fn update(&self, package: &Package) -> Result<()>;
}

/// Checksums of files stored in the pool, keyed by pool path
pub trait ChecksumStorage: Send + Sync {
    fn get(&self, pool_path: &str) -> Result<Option<ChecksumInfo>>;

    fn update(&self, pool_path: &str, checksums: &ChecksumInfo) -> Result<()>;
}

/// In-memory package and checksum store
#[derive(Debug, Default)]
pub struct MemoryCollection {
    packages: RwLock<HashMap<PackageRef, Package>>,
    checksums: RwLock<HashMap<String, ChecksumInfo>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collection pre-populated with `packages`
    pub fn with_packages<'a>(packages: impl IntoIterator<Item = &'a Package>) -> Self {
        let collection = Self::new();
        {
            let mut map = collection.packages.write();
            for package in packages {
                map.insert(package.key(), package.clone());
            }
        }
        collection
    }

    pub fn len(&self) -> usize {
        self.packages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.read().is_empty()
    }
}

impl PackageCollection for MemoryCollection {
    fn get(&self, key: &PackageRef) -> Result<Package> {
        self.packages
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFoundError(format!("package {}", key)))
    }

    fn update(&self, package: &Package) -> Result<()> {
        self.packages.write().insert(package.key(), package.clone());
        Ok(())
    }
}

impl ChecksumStorage for MemoryCollection {
    fn get(&self, pool_path: &str) -> Result<Option<ChecksumInfo>> {
        Ok(self.checksums.read().get(pool_path).cloned())
    }

    fn update(&self, pool_path: &str, checksums: &ChecksumInfo) -> Result<()> {
        self.checksums
            .write()
            .insert(pool_path.to_string(), checksums.clone());
        Ok(())
    }
}
