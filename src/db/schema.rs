// src/db/schema.rs

//! SQLite schema and migrations
//!
//! Versions are recorded in `schema_version`; opening a database applies
//! every migration above the recorded version in order.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Highest applied schema version, 0 for a fresh database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version: Option<i32> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

/// Bring the schema up to [`SCHEMA_VERSION`]
pub fn migrate(conn: &Connection) -> Result<()> {
    let current = get_schema_version(conn)?;
    if current >= SCHEMA_VERSION {
        debug!("Schema is up to date at version {}", current);
        return Ok(());
    }

    for version in (current + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::ConfigurationError(format!(
            "unknown schema migration version {}",
            version
        ))),
    }
}

/// Package metadata and pool checksums
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE packages (
            key TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            architecture TEXT NOT NULL,
            data TEXT NOT NULL
        );

        CREATE INDEX idx_packages_name ON packages(name, architecture);

        CREATE TABLE checksums (
            pool_path TEXT PRIMARY KEY,
            size INTEGER NOT NULL,
            md5 TEXT,
            sha256 TEXT,
            sha512 TEXT
        );
        ",
    )?;
    Ok(())
}

/// Named reference lists and mirror records
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE ref_lists (
            name TEXT PRIMARY KEY,
            data BLOB NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE mirrors (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            data TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
