// src/context.rs

//! Collaborators shared by one run of the core
//!
//! Nothing in the crate reaches for global state: operations that need
//! storage, the pool or the network take a [`Context`] built by the caller.
//! Separate contexts are fully isolated, so tests can run side by side.

use crate::collection::{ChecksumStorage, PackageCollection};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::pool::{FilePool, PackagePool};
use crate::progress::{ProgressTracker, SilentProgress};
use crate::repository::{Downloader, RepositoryClient};
use std::sync::Arc;

/// Configuration plus the collaborators of the core
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub collection: Arc<dyn PackageCollection>,
    pub checksums: Arc<dyn ChecksumStorage>,
    pub pool: Arc<dyn PackagePool>,
    pub downloader: Arc<dyn Downloader>,
    pub progress: Arc<dyn ProgressTracker>,
}

impl Context {
    pub fn new(
        config: Config,
        collection: Arc<dyn PackageCollection>,
        checksums: Arc<dyn ChecksumStorage>,
        pool: Arc<dyn PackagePool>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            collection,
            checksums,
            pool,
            downloader,
            progress: Arc::new(SilentProgress::new()),
        }
    }

    /// Context backed by the database and pool under `config.root_dir`
    pub fn open(config: Config) -> Result<Self> {
        let database = Arc::new(Database::open(&config.database_path())?);
        let pool = Arc::new(FilePool::new(config.pool_dir())?);
        let downloader = Arc::new(RepositoryClient::new()?);
        Ok(Self::new(config, database.clone(), database, pool, downloader))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
