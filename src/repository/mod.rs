// src/repository/mod.rs

//! Remote archive mirroring
//!
//! This module provides:
//! - Mirror records and their update lock
//! - HTTP downloads with streaming checksum verification
//! - A bounded worker pool with cancellation
//! - The sync pipeline from remote index to committed ref list

mod client;
mod mirror;
mod sync;
mod workers;

pub use client::{Downloader, RepositoryClient};
pub use mirror::{Mirror, MirrorSource, MirrorStatus};
pub use sync::{DownloadQueue, PackageDownloadTask, Syncer, UpdateSummary};
pub use workers::{Cancellation, WorkerPool, WorkerReport};
