// src/repository/mirror.rs

//! Mirror records
//!
//! A mirror tracks one remote archive distribution. Its membership is a
//! [`PackageRefList`] replaced as a whole by a successful update. The
//! status doubles as a cross-process lock: a mirror is busy while it is
//! `Updating` and the recorded worker process is still alive.

use crate::error::{Error, Result};
use crate::package::{Package, PackageFile, PackageType};
use crate::reflist::PackageRefList;
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::info;
use url::Url;
use uuid::Uuid;

use super::client::Downloader;
use super::workers::Cancellation;

/// Update state of a mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MirrorStatus {
    #[default]
    Idle,
    Updating,
    Failed,
}

/// Remote archive mirror
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mirror {
    pub uuid: Uuid,
    pub name: String,
    /// Archive root, always ending in `/`
    pub archive_root: String,
    pub distribution: String,
    pub components: Vec<String>,
    /// Binary architectures to mirror; empty mirrors every architecture
    pub architectures: Vec<String>,
    pub download_sources: bool,
    pub download_udebs: bool,
    /// Query restricting the mirrored packages
    pub filter: Option<String>,
    pub filter_with_deps: bool,
    /// Skip signature verification of the remote index
    pub ignore_signatures: bool,
    pub status: MirrorStatus,
    pub worker_pid: Option<u32>,
    pub last_download_date: Option<DateTime<Utc>>,
    /// Stored separately, see [`Mirror::ref_list_name`]
    #[serde(skip)]
    pub ref_list: PackageRefList,
}

impl Mirror {
    pub fn new(
        name: impl Into<String>,
        archive_root: &str,
        distribution: impl Into<String>,
    ) -> Result<Self> {
        let mut root = Url::parse(archive_root).map_err(|e| {
            Error::ConfigurationError(format!("invalid archive root '{}': {}", archive_root, e))
        })?;
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }

        Ok(Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            archive_root: root.to_string(),
            distribution: distribution.into(),
            components: Vec::new(),
            architectures: Vec::new(),
            download_sources: false,
            download_udebs: false,
            filter: None,
            filter_with_deps: false,
            ignore_signatures: false,
            status: MirrorStatus::Idle,
            worker_pid: None,
            last_download_date: None,
            ref_list: PackageRefList::new(),
        })
    }

    pub fn with_components<S: Into<String>>(mut self, components: impl IntoIterator<Item = S>) -> Self {
        self.components = components.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_architectures<S: Into<String>>(
        mut self,
        architectures: impl IntoIterator<Item = S>,
    ) -> Self {
        self.architectures = architectures.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>, with_deps: bool) -> Self {
        self.filter = Some(filter.into());
        self.filter_with_deps = with_deps;
        self
    }

    pub fn with_sources(mut self, download_sources: bool) -> Self {
        self.download_sources = download_sources;
        self
    }

    pub fn with_udebs(mut self, download_udebs: bool) -> Self {
        self.download_udebs = download_udebs;
        self
    }

    /// Name the mirror's ref list is stored under
    pub fn ref_list_name(&self) -> String {
        format!("mirror/{}", self.uuid)
    }

    /// Absolute URL of a package file in the archive
    pub fn file_url(&self, file: &PackageFile) -> Result<String> {
        let root = Url::parse(&self.archive_root).map_err(|e| {
            Error::ConfigurationError(format!("invalid archive root '{}': {}", self.archive_root, e))
        })?;
        let url = root.join(&file.download_url_path()).map_err(|e| {
            Error::ConfigurationError(format!("invalid path for {}: {}", file.filename, e))
        })?;
        Ok(url.to_string())
    }

    /// Whether a package from the remote index belongs in this mirror
    pub fn accepts(&self, package: &Package) -> bool {
        match package.package_type() {
            PackageType::Source => self.download_sources,
            PackageType::Udeb if !self.download_udebs => false,
            _ => {
                self.architectures.is_empty()
                    || package.architecture() == crate::package::ARCHITECTURE_ALL
                    || self.architectures.iter().any(|a| a == package.architecture())
            }
        }
    }

    pub fn is_updating(&self) -> bool {
        self.status == MirrorStatus::Updating
    }

    /// Mark the mirror as being updated by this process
    pub fn mark_as_updating(&mut self) {
        self.status = MirrorStatus::Updating;
        self.worker_pid = Some(std::process::id());
        info!("Mirror {} is updating", self.name);
    }

    pub fn mark_as_idle(&mut self) {
        self.status = MirrorStatus::Idle;
        self.worker_pid = None;
        info!("Mirror {} is idle", self.name);
    }

    pub fn mark_as_failed(&mut self) {
        self.status = MirrorStatus::Failed;
        self.worker_pid = None;
        info!("Mirror {} update failed", self.name);
    }

    /// Fail if another live process is updating the mirror
    ///
    /// An `Updating` record whose worker has died is a stale lock and does
    /// not block.
    pub fn check_lock(&self) -> Result<()> {
        if !self.is_updating() {
            return Ok(());
        }
        match self.worker_pid {
            Some(pid) if process_alive(pid) => Err(Error::MirrorLocked {
                name: self.name.clone(),
                pid,
            }),
            _ => Ok(()),
        }
    }
}

fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // The process exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Remote index of a mirror
///
/// Implementations fetch the release and package indexes through the
/// downloader, verify their signatures unless told otherwise, and return
/// the listed packages.
pub trait MirrorSource: Send + Sync {
    fn fetch(
        &self,
        mirror: &Mirror,
        downloader: &dyn Downloader,
        cancel: &Cancellation,
        ignore_signatures: bool,
    ) -> Result<Vec<Package>>;
}
