// src/db/mod.rs

//! SQLite-backed package collection, checksum storage and ref list store
//!
//! Packages are stored as JSON documents keyed by [`PackageRef`]; pool
//! checksums are stored one row per pool path. Named reference lists (the
//! membership of mirrors, snapshots and local repositories) are stored in
//! their encoded form and replaced as a whole.

pub mod schema;

use crate::collection::{ChecksumStorage, PackageCollection};
use crate::error::{Error, Result};
use crate::hash::ChecksumInfo;
use crate::package::{Package, PackageRef};
use crate::reflist::PackageRefList;
use crate::repository::Mirror;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

/// Metadata database
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) and migrate a database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored packages
    pub fn package_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Replace the stored list under `name`
    pub fn save_ref_list(&self, name: &str, list: &PackageRefList) -> Result<()> {
        let data = list.encode()?;
        self.conn.lock().execute(
            "INSERT INTO ref_lists (name, data) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET data = excluded.data,
                 updated_at = CURRENT_TIMESTAMP",
            params![name, data],
        )?;
        debug!("Saved ref list {} ({} refs)", name, list.len());
        Ok(())
    }

    /// Load the list stored under `name`; unknown names yield an empty list
    pub fn load_ref_list(&self, name: &str) -> Result<PackageRefList> {
        let data: Option<Vec<u8>> = self
            .conn
            .lock()
            .query_row(
                "SELECT data FROM ref_lists WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(data) => PackageRefList::decode(&data),
            None => Ok(PackageRefList::new()),
        }
    }

    /// Insert or replace a mirror record together with its ref list
    pub fn save_mirror(&self, mirror: &Mirror) -> Result<()> {
        let data = serde_json::to_string(mirror)?;
        self.conn.lock().execute(
            "INSERT INTO mirrors (uuid, name, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(uuid) DO UPDATE SET name = excluded.name, data = excluded.data",
            params![mirror.uuid.to_string(), mirror.name, data],
        )?;
        self.save_ref_list(&mirror.ref_list_name(), &mirror.ref_list)
    }

    pub fn load_mirror(&self, name: &str) -> Result<Mirror> {
        let data: Option<String> = self
            .conn
            .lock()
            .query_row("SELECT data FROM mirrors WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        let data = data.ok_or_else(|| Error::NotFoundError(format!("mirror {}", name)))?;
        let mut mirror: Mirror = serde_json::from_str(&data)?;
        mirror.ref_list = self.load_ref_list(&mirror.ref_list_name())?;
        Ok(mirror)
    }
}

impl PackageCollection for Database {
    fn get(&self, key: &PackageRef) -> Result<Package> {
        let data: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT data FROM packages WHERE key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let data = data.ok_or_else(|| Error::NotFoundError(format!("package {}", key)))?;
        Ok(serde_json::from_str(&data)?)
    }

    fn update(&self, package: &Package) -> Result<()> {
        let data = serde_json::to_string(package)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO packages (key, name, architecture, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![package.key().as_str(), package.name(), package.architecture(), data],
        )?;
        Ok(())
    }
}

impl ChecksumStorage for Database {
    fn get(&self, pool_path: &str) -> Result<Option<ChecksumInfo>> {
        let info = self
            .conn
            .lock()
            .query_row(
                "SELECT size, md5, sha256, sha512 FROM checksums WHERE pool_path = ?1",
                [pool_path],
                |row| {
                    Ok(ChecksumInfo {
                        size: row.get::<_, i64>(0)? as u64,
                        md5: row.get(1)?,
                        sha256: row.get(2)?,
                        sha512: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }

    fn update(&self, pool_path: &str, checksums: &ChecksumInfo) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO checksums (pool_path, size, md5, sha256, sha512)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                pool_path,
                checksums.size as i64,
                checksums.md5,
                checksums.sha256,
                checksums.sha512
            ],
        )?;
        Ok(())
    }
}
