// src/lib.rs

//! Aptly repository core
//!
//! Package-set model and mirror synchronization for Debian-style archives.
//!
//! # Architecture
//!
//! - Reference lists: every mirror, snapshot and local repository is a
//!   sorted list of package keys with pure set algebra
//! - Package lists: ref lists materialised from the metadata collection and
//!   indexed by name, provides and architecture
//! - Queries and dependency closure: predicate filtering plus a fixed-point
//!   resolver over Depends/Recommends/Suggests/Source edges
//! - Mirror sync: index fetch, pool diff, bounded concurrent download with
//!   checksum verification, all-or-nothing ref list commit

pub mod collection;
pub mod config;
pub mod context;
pub mod db;
mod error;
pub mod hash;
pub mod package;
pub mod packagelist;
pub mod pool;
pub mod progress;
pub mod query;
pub mod reflist;
pub mod repository;
pub mod version;

pub use collection::{ChecksumStorage, MemoryCollection, PackageCollection};
pub use config::Config;
pub use context::Context;
pub use error::{Error, Result, TaskFailure};
pub use hash::{ChecksumInfo, HashAlgorithm};
pub use package::{Dependency, DependencyOptions, Package, PackageFile, PackageRef, PackageType};
pub use packagelist::{FilterOptions, PackageList};
pub use pool::{FilePool, PackagePool};
pub use progress::{
    BarProgress, CallbackProgress, LogProgress, ProgressEvent, ProgressTracker, ProgressUnit,
    SilentProgress,
};
pub use query::Query;
pub use reflist::{merge_sources, MergeStrategy, PackageRefList, RefListDiff};
pub use repository::{
    Cancellation, Downloader, Mirror, MirrorSource, MirrorStatus, PackageDownloadTask, Syncer,
};
pub use version::{compare_versions, DebVersion, VersionRelation};
