// src/repository/sync.rs

//! Mirror synchronization
//!
//! An update runs in five steps:
//!
//! 1. fetch the remote index through a [`MirrorSource`]
//! 2. narrow it to the mirror's filter query, optionally with dependencies
//! 3. queue every file the pool does not already hold
//! 4. download the queue on a bounded [`WorkerPool`], importing each
//!    verified file into the pool
//! 5. commit the new ref list
//!
//! Download failures are retried per task and collected; the ref list is
//! replaced only when every task succeeded, so a failed update leaves the
//! mirror exactly as it was.

use crate::context::Context;
use crate::error::{Error, Result, TaskFailure};
use crate::hash::ChecksumInfo;
use crate::packagelist::{FilterOptions, PackageList};
use crate::progress::ProgressUnit;
use crate::query;
use crate::reflist::RefListDiff;
use chrono::Utc;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::mirror::{Mirror, MirrorSource};
use super::workers::{Cancellation, WorkerPool};

/// One file to fetch into the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDownloadTask {
    /// Owning package, `name_version_arch`
    pub package: String,
    pub url: String,
    pub filename: String,
    /// Destination in the pool, when the checksums allow computing it
    pub pool_path: Option<String>,
    pub checksums: ChecksumInfo,
    /// Attempts before the task fails
    pub max_tries: u32,
}

/// Files missing from the pool
#[derive(Debug, Clone, Default)]
pub struct DownloadQueue {
    pub tasks: Vec<PackageDownloadTask>,
    /// Bytes to download
    pub download_size: u64,
    /// Files already present in the pool
    pub satisfied: usize,
}

/// Outcome of a successful update
#[derive(Debug, Clone)]
pub struct UpdateSummary {
    /// Packages in the new ref list
    pub packages: usize,
    pub downloaded_files: usize,
    pub downloaded_bytes: u64,
    /// Change against the previous ref list
    pub diff: RefListDiff,
}

/// Runs mirror updates against a [`Context`]
pub struct Syncer<'a> {
    context: &'a Context,
    cancel: Cancellation,
}

impl<'a> Syncer<'a> {
    pub fn new(context: &'a Context) -> Self {
        Self {
            context,
            cancel: Cancellation::new(),
        }
    }

    /// Use an externally controlled cancellation flag
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    /// Fetch the remote index, keeping the packages the mirror accepts
    pub fn fetch(&self, mirror: &Mirror, source: &dyn MirrorSource) -> Result<PackageList> {
        let ignore_signatures = mirror.ignore_signatures || self.context.config.gpg_disable_verify;
        if ignore_signatures {
            warn!("Signature verification disabled for mirror {}", mirror.name);
        }

        let packages = source.fetch(
            mirror,
            self.context.downloader.as_ref(),
            &self.cancel,
            ignore_signatures,
        )?;
        let download_sources =
            mirror.download_sources || self.context.config.download_source_packages;
        let total = packages.len();
        let list = PackageList::from_packages(packages.into_iter().filter(|p| {
            if p.is_source() {
                download_sources
            } else {
                mirror.accepts(p)
            }
        }));
        info!(
            "Mirror {}: remote index lists {} packages, {} accepted",
            mirror.name,
            total,
            list.len()
        );
        Ok(list)
    }

    /// Restrict `list` to the mirror's filter query
    pub fn apply_filter(&self, mirror: &Mirror, mut list: PackageList) -> Result<PackageList> {
        let Some(filter) = mirror.filter.as_deref() else {
            return Ok(list);
        };

        let query = query::parse(filter)?;
        list.prepare_index();

        let mut options = FilterOptions::new(vec![query]).with_progress(self.context.progress.as_ref());
        if mirror.filter_with_deps {
            let architectures = if mirror.architectures.is_empty() {
                self.context.config.architectures.clone()
            } else {
                mirror.architectures.clone()
            };
            options = options
                .with_dependencies(self.context.config.dependency_options())
                .with_architectures(architectures);
        }

        let filtered = list.filter(&options)?;
        info!(
            "Mirror {}: filter '{}' kept {} of {} packages",
            mirror.name,
            filter,
            filtered.len(),
            list.len()
        );
        Ok(filtered)
    }

    /// Queue the files of `list` the pool does not hold
    ///
    /// Files are checked against the pool in parallel. With
    /// `skip_existing` a file of the right size counts as present without
    /// consulting its checksums.
    pub fn build_download_queue(
        &self,
        mirror: &Mirror,
        list: &PackageList,
        skip_existing: bool,
    ) -> Result<DownloadQueue> {
        let pool = self.context.pool.as_ref();
        let storage = self.context.checksums.as_ref();
        let progress = self.context.progress.as_ref();
        let max_tries = self.context.config.download_retries.max(1);

        let files: Vec<_> = list
            .packages()
            .flat_map(|package| package.files().iter().map(move |file| (package, file)))
            .collect();
        progress.start("Building download queue", files.len() as u64, ProgressUnit::Items);

        let checked: Vec<Option<PackageDownloadTask>> = files
            .par_iter()
            .map(|(package, file)| -> Result<Option<PackageDownloadTask>> {
                let pool_path = if file.checksums.complete() {
                    Some(pool.path_for(&file.filename, &file.checksums)?)
                } else {
                    None
                };

                let present = match &pool_path {
                    Some(path) if skip_existing => fs::metadata(pool.full_path(path))
                        .map(|m| m.len() == file.checksums.size)
                        .unwrap_or(false),
                    Some(path) => pool.verify(Some(path), &file.filename, &file.checksums, storage)?.1,
                    None => false,
                };
                progress.increment(1);
                if present {
                    return Ok(None);
                }

                Ok(Some(PackageDownloadTask {
                    package: package.to_string(),
                    url: mirror.file_url(file)?,
                    filename: file.filename.clone(),
                    pool_path,
                    checksums: file.checksums.clone(),
                    max_tries,
                }))
            })
            .collect::<Result<_>>()?;

        let satisfied = checked.iter().filter(|t| t.is_none()).count();
        let mut seen = HashSet::new();
        let tasks: Vec<PackageDownloadTask> = checked
            .into_iter()
            .flatten()
            .filter(|task| seen.insert(task.url.clone()))
            .collect();
        let download_size = tasks.iter().map(|t| t.checksums.size).sum();
        progress.finish("Download queue built");

        info!(
            "Mirror {}: {} files to download ({} bytes), {} already in pool",
            mirror.name,
            tasks.len(),
            download_size,
            satisfied
        );
        Ok(DownloadQueue {
            tasks,
            download_size,
            satisfied,
        })
    }

    /// Download and import every task
    ///
    /// Every task is attempted even when others fail; failures are then
    /// reported together as [`Error::DownloadFailed`]. A cancelled run
    /// reports [`Error::Cancelled`].
    pub fn download(&self, tasks: Vec<PackageDownloadTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let progress = self.context.progress.as_ref();
        let total: u64 = tasks.iter().map(|t| t.checksums.size).sum();
        progress.start("Downloading packages", total, ProgressUnit::Bytes);

        let staging_root = self.context.config.root_dir.join("tmp");
        fs::create_dir_all(&staging_root)?;
        let staging = tempfile::Builder::new()
            .prefix("download-")
            .tempdir_in(&staging_root)?;

        let workers = WorkerPool::new(self.context.config.download_concurrency);
        let report = workers.run(tasks, &self.cancel, |task| {
            self.process_task(task, staging.path())
        });

        if self.cancel.is_cancelled() || !report.skipped.is_empty() {
            progress.finish_with_error("Download cancelled");
            return Err(Error::Cancelled);
        }

        if !report.failed.is_empty() {
            let mut failures: Vec<TaskFailure> = report
                .failed
                .into_iter()
                .map(|(task, error)| TaskFailure {
                    package: task.package,
                    url: task.url,
                    error: error.to_string(),
                })
                .collect();
            failures.sort_by(|a, b| a.package.cmp(&b.package).then_with(|| a.url.cmp(&b.url)));
            progress.finish_with_error(&format!("{} downloads failed", failures.len()));
            return Err(Error::DownloadFailed(failures));
        }

        progress.finish(&format!("Downloaded {} files", report.completed.len()));
        Ok(())
    }

    fn process_task(&self, task: &PackageDownloadTask, staging: &Path) -> Result<String> {
        let temp = tempfile::Builder::new()
            .prefix(".part-")
            .tempfile_in(staging)?
            .into_temp_path();
        let downloader = self.context.downloader.as_ref();
        let retry_delay = self.context.config.retry_delay_ms;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.cancel.check()?;
            match downloader.download_with_checksum(&self.cancel, &task.url, &temp, &task.checksums, false) {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < task.max_tries => {
                    warn!(
                        "Download of {} failed (attempt {}/{}): {}, retrying...",
                        task.url, attempt, task.max_tries, e
                    );
                    self.cancel
                        .sleep(Duration::from_millis(retry_delay * attempt as u64))?;
                }
                Err(e) => {
                    warn!("Download of {} failed after {} attempts: {}", task.url, attempt, e);
                    return Err(e);
                }
            }
        }

        let pool_path = self.context.pool.import(
            &temp,
            &task.filename,
            &task.checksums,
            true,
            self.context.checksums.as_ref(),
        )?;
        self.context.progress.increment(task.checksums.size);
        debug!("Imported {} as {}", task.filename, pool_path);
        Ok(pool_path)
    }

    /// Store the packages and replace the mirror's ref list
    pub fn finalize_download(&self, mirror: &mut Mirror, list: &PackageList) -> Result<RefListDiff> {
        for package in list.packages() {
            self.context.collection.update(package)?;
        }

        let ref_list = list.to_ref_list();
        let diff = mirror.ref_list.diff(&ref_list);
        info!(
            "Mirror {}: {} packages added, {} removed",
            mirror.name,
            diff.added.len(),
            diff.removed.len()
        );
        mirror.ref_list = ref_list;
        mirror.last_download_date = Some(Utc::now());
        Ok(diff)
    }

    /// Run a full update of `mirror`
    ///
    /// The mirror is `Updating` while this runs and ends `Idle` on success
    /// or `Failed` on error; persisting those transitions is up to the
    /// caller. Fails with [`Error::MirrorLocked`] if another live process
    /// holds the mirror.
    pub fn update(&self, mirror: &mut Mirror, source: &dyn MirrorSource) -> Result<UpdateSummary> {
        mirror.check_lock()?;
        mirror.mark_as_updating();

        match self.run_update(mirror, source) {
            Ok(summary) => {
                mirror.mark_as_idle();
                Ok(summary)
            }
            Err(e) => {
                warn!("Mirror {} update failed: {}", mirror.name, e);
                mirror.mark_as_failed();
                Err(e)
            }
        }
    }

    fn run_update(&self, mirror: &mut Mirror, source: &dyn MirrorSource) -> Result<UpdateSummary> {
        let list = self.fetch(mirror, source)?;
        let list = self.apply_filter(mirror, list)?;
        let queue =
            self.build_download_queue(mirror, &list, self.context.config.skip_existing_packages)?;
        let downloaded_files = queue.tasks.len();
        let downloaded_bytes = queue.download_size;

        self.download(queue.tasks)?;
        let diff = self.finalize_download(mirror, &list)?;

        Ok(UpdateSummary {
            packages: list.len(),
            downloaded_files,
            downloaded_bytes,
            diff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use crate::config::Config;
    use crate::package::{Package, PackageFile};
    use crate::pool::{FilePool, PackagePool};
    use crate::repository::Downloader;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves file contents from memory, failing the first `failures` tries
    /// of a URL
    #[derive(Default)]
    struct MemoryDownloader {
        files: HashMap<String, Vec<u8>>,
        failures: HashMap<String, usize>,
        attempts: Mutex<HashMap<String, usize>>,
        calls: AtomicUsize,
    }

    impl Downloader for MemoryDownloader {
        fn download(&self, cancel: &Cancellation, url: &str, dest: &Path) -> Result<()> {
            cancel.check()?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            let attempt = {
                let mut attempts = self.attempts.lock();
                let n = attempts.entry(url.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            if attempt <= self.failures.get(url).copied().unwrap_or(0) {
                return Err(Error::DownloadError(format!("HTTP 503 from {}", url)));
            }
            let data = self
                .files
                .get(url)
                .ok_or_else(|| Error::DownloadError(format!("HTTP 404 from {}", url)))?;
            fs::write(dest, data)?;
            Ok(())
        }

        fn download_with_checksum(
            &self,
            cancel: &Cancellation,
            url: &str,
            dest: &Path,
            expected: &ChecksumInfo,
            _ignore_mismatch: bool,
        ) -> Result<()> {
            self.download(cancel, url, dest)?;
            let actual = ChecksumInfo::from_file(dest)?;
            expected.verify(&actual).map_err(|m| Error::ChecksumMismatch {
                path: url.to_string(),
                expected: m.expected,
                actual: m.actual,
            })
        }
    }

    struct StaticSource(Vec<Package>);

    impl MirrorSource for StaticSource {
        fn fetch(
            &self,
            _mirror: &Mirror,
            _downloader: &dyn Downloader,
            _cancel: &Cancellation,
            _ignore_signatures: bool,
        ) -> Result<Vec<Package>> {
            Ok(self.0.clone())
        }
    }

    const ROOT: &str = "http://archive.test/debian/";

    fn package(name: &str, content: &[u8]) -> Package {
        let filename = format!("{}_1.0_amd64.deb", name);
        Package::new(name, "1.0", "amd64")
            .unwrap()
            .with_file(PackageFile::new(
                filename,
                format!("pool/main/{}", name),
                ChecksumInfo::from_bytes(content),
            ))
    }

    fn url(name: &str) -> String {
        format!("{}pool/main/{}/{}_1.0_amd64.deb", ROOT, name, name)
    }

    struct Fixture {
        dir: tempfile::TempDir,
        context: Context,
        pool: Arc<FilePool>,
        downloader: Arc<MemoryDownloader>,
    }

    fn fixture(downloader: MemoryDownloader) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            root_dir: dir.path().to_path_buf(),
            download_concurrency: 2,
            retry_delay_ms: 0,
            ..Config::default()
        };
        let pool = Arc::new(FilePool::new(config.pool_dir()).unwrap());
        let storage = Arc::new(MemoryCollection::new());
        let downloader = Arc::new(downloader);
        let context = Context::new(config, storage.clone(), storage, pool.clone(), downloader.clone());
        Fixture {
            dir,
            context,
            pool,
            downloader,
        }
    }

    fn mirror() -> Mirror {
        Mirror::new("test", ROOT, "stable")
            .unwrap()
            .with_components(["main"])
            .with_architectures(["amd64"])
    }

    #[test]
    fn test_queue_skips_pooled_files() {
        let f = fixture(MemoryDownloader::default());
        let staged = f.dir.path().join("b.deb");
        fs::write(&staged, b"bbb").unwrap();
        f.pool
            .import(&staged, "b_1.0_amd64.deb", &ChecksumInfo::from_bytes(b"bbb"), false, f.context.checksums.as_ref())
            .unwrap();

        let list = PackageList::from_packages([package("a", b"aaa"), package("b", b"bbb"), package("c", b"ccc")]);
        let queue = Syncer::new(&f.context)
            .build_download_queue(&mirror(), &list, false)
            .unwrap();
        assert_eq!(queue.tasks.len(), 2);
        assert_eq!(queue.satisfied, 1);
        assert_eq!(queue.download_size, 6);
        assert_eq!(queue.tasks[0].url, url("a"));
        assert_eq!(queue.tasks[0].max_tries, 3);
    }

    #[test]
    fn test_download_retries_transient_failures() {
        let downloader = MemoryDownloader {
            files: [(url("a"), b"aaa".to_vec())].into_iter().collect(),
            failures: [(url("a"), 2)].into_iter().collect(),
            ..Default::default()
        };
        let f = fixture(downloader);
        let syncer = Syncer::new(&f.context);
        let list = PackageList::from_packages([package("a", b"aaa")]);
        let queue = syncer.build_download_queue(&mirror(), &list, false).unwrap();

        syncer.download(queue.tasks.clone()).unwrap();
        assert_eq!(f.downloader.calls.load(Ordering::SeqCst), 3);
        let pool_path = queue.tasks[0].pool_path.clone().unwrap();
        assert_eq!(fs::read(f.pool.full_path(&pool_path)).unwrap(), b"aaa");
    }

    #[test]
    fn test_update_commits_ref_list() {
        let downloader = MemoryDownloader {
            files: [(url("a"), b"aaa".to_vec()), (url("b"), b"bbb".to_vec())]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let f = fixture(downloader);
        let source = StaticSource(vec![
            package("a", b"aaa"),
            package("b", b"bbb"),
            Package::new("x", "1.0", "i386").unwrap(),
        ]);
        let mut m = mirror();

        let summary = Syncer::new(&f.context).update(&mut m, &source).unwrap();
        assert_eq!(summary.packages, 2);
        assert_eq!(summary.downloaded_files, 2);
        assert_eq!(summary.diff.added.len(), 2);
        assert_eq!(m.ref_list.len(), 2);
        assert_eq!(m.status, crate::repository::MirrorStatus::Idle);
        assert!(m.last_download_date.is_some());
        assert!(f.context.collection.get(&package("a", b"aaa").key()).is_ok());

        // Second run downloads nothing
        let summary = Syncer::new(&f.context).update(&mut m, &source).unwrap();
        assert_eq!(summary.downloaded_files, 0);
        assert!(summary.diff.is_empty());
    }

    #[test]
    fn test_failed_update_keeps_ref_list() {
        let downloader = MemoryDownloader {
            files: [(url("a"), b"aaa".to_vec()), (url("b"), b"corrupt".to_vec())]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let f = fixture(downloader);
        let mut m = mirror();
        let before = m.ref_list.clone();
        let source = StaticSource(vec![package("a", b"aaa"), package("b", b"bbb")]);

        let err = Syncer::new(&f.context).update(&mut m, &source).unwrap_err();
        match &err {
            Error::DownloadFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].package, "b_1.0_amd64");
            }
            other => panic!("unexpected error {}", other),
        }
        assert!(err.to_string().contains("b_1.0_amd64"));
        assert_eq!(m.ref_list, before);
        assert_eq!(m.status, crate::repository::MirrorStatus::Failed);
        // Every attempt was made: 3 for b, 1 for a
        assert_eq!(f.downloader.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_cancelled_download() {
        let f = fixture(MemoryDownloader {
            files: [(url("a"), b"aaa".to_vec())].into_iter().collect(),
            ..Default::default()
        });
        let syncer = Syncer::new(&f.context);
        let list = PackageList::from_packages([package("a", b"aaa")]);
        let queue = syncer.build_download_queue(&mirror(), &list, false).unwrap();
        syncer.cancellation().cancel();
        assert!(matches!(syncer.download(queue.tasks), Err(Error::Cancelled)));
    }

    #[test]
    fn test_fetch_takes_sources_from_config() {
        let f = fixture(MemoryDownloader::default());
        let source = StaticSource(vec![
            package("a", b"aaa"),
            Package::new("a", "1.0", "source").unwrap(),
        ]);
        assert_eq!(Syncer::new(&f.context).fetch(&mirror(), &source).unwrap().len(), 1);

        let mut f = f;
        let config = Config {
            download_source_packages: true,
            ..(*f.context.config).clone()
        };
        f.context.config = Arc::new(config);
        let list = Syncer::new(&f.context).fetch(&mirror(), &source).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.packages().any(|p| p.is_source()));
    }

    #[test]
    fn test_cancel_interrupts_retry_delay() {
        let downloader = MemoryDownloader {
            files: [(url("a"), b"aaa".to_vec())].into_iter().collect(),
            failures: [(url("a"), 5)].into_iter().collect(),
            ..Default::default()
        };
        let mut f = fixture(downloader);
        let config = Config {
            retry_delay_ms: 60_000,
            ..(*f.context.config).clone()
        };
        f.context.config = Arc::new(config);
        let syncer = Syncer::new(&f.context);
        let list = PackageList::from_packages([package("a", b"aaa")]);
        let queue = syncer.build_download_queue(&mirror(), &list, false).unwrap();

        let cancel = syncer.cancellation().clone();
        let started = std::time::Instant::now();
        let result = std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            });
            syncer.download(queue.tasks.clone())
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(f.downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_filter_with_dependencies() {
        let f = fixture(MemoryDownloader::default());
        let nginx = package("nginx", b"n").with_depends("libc6").unwrap();
        let list = PackageList::from_packages([nginx, package("libc6", b"l"), package("vim", b"v")]);
        let m = mirror().with_filter("Name (nginx)", true);

        let filtered = Syncer::new(&f.context).apply_filter(&m, list).unwrap();
        let mut names: Vec<_> = filtered.packages().map(|p| p.name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["libc6", "nginx"]);
    }
}
