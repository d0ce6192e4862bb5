// src/progress.rs

//! Progress reporting for long-running operations
//!
//! Loading reference lists, resolving dependencies, verifying the pool and
//! downloading files all report through [`ProgressTracker`]. The sink is
//! chosen by the caller:
//!
//! - [`SilentProgress`]: counts only, for tests and scripted runs
//! - [`LogProgress`]: periodic `tracing` lines
//! - [`BarProgress`]: an indicatif bar for interactive terminals
//! - [`CallbackProgress`]: forwards [`ProgressEvent`]s to a closure
//!
//! Every tracker is `Send + Sync`; download workers share one instance.

use indicatif::{ProgressBar, ProgressStyle as BarStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

/// How a phase is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressUnit {
    /// Discrete items (packages, tasks)
    #[default]
    Items,
    /// Transferred bytes
    Bytes,
}

/// Sink for progress of one operation
pub trait ProgressTracker: Send + Sync {
    /// Begin a new phase with a known total, resetting the position
    fn start(&self, phase: &str, total: u64, unit: ProgressUnit);

    /// Advance the position
    fn increment(&self, amount: u64);

    /// Change the total of the running phase
    fn set_length(&self, length: u64);

    /// Free-form status line
    fn set_message(&self, message: &str);

    /// Current position within the phase
    fn position(&self) -> u64;

    /// Total of the current phase
    fn length(&self) -> u64;

    /// End the current phase successfully
    fn finish(&self, message: &str);

    /// End the current phase with an error
    fn finish_with_error(&self, message: &str);

    fn is_finished(&self) -> bool;
}

#[derive(Debug, Default)]
struct Counters {
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl Counters {
    fn reset(&self, total: u64) {
        self.position.store(0, Ordering::Relaxed);
        self.length.store(total, Ordering::Relaxed);
        self.finished.store(false, Ordering::Relaxed);
    }

    fn add(&self, amount: u64) -> (u64, u64) {
        let old = self.position.fetch_add(amount, Ordering::Relaxed);
        (old, old + amount)
    }
}

/// Progress tracker that only counts
#[derive(Debug, Default)]
pub struct SilentProgress {
    counters: Counters,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn start(&self, _phase: &str, total: u64, _unit: ProgressUnit) {
        self.counters.reset(total);
    }

    fn increment(&self, amount: u64) {
        self.counters.add(amount);
    }

    fn set_length(&self, length: u64) {
        self.counters.length.store(length, Ordering::Relaxed);
    }

    fn set_message(&self, _message: &str) {}

    fn position(&self) -> u64 {
        self.counters.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.counters.length.load(Ordering::Relaxed)
    }

    fn finish(&self, _message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
    }

    fn finish_with_error(&self, _message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.counters.finished.load(Ordering::Relaxed)
    }
}

/// Progress tracker writing to `tracing`
///
/// Logs roughly every tenth of a phase.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    phase: parking_lot::Mutex<String>,
    counters: Counters,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: parking_lot::Mutex::new(String::new()),
            counters: Counters::default(),
        }
    }
}

impl ProgressTracker for LogProgress {
    fn start(&self, phase: &str, total: u64, _unit: ProgressUnit) {
        *self.phase.lock() = phase.to_string();
        self.counters.reset(total);
        info!("{}: {} ({} total)", self.name, phase, total);
    }

    fn increment(&self, amount: u64) {
        let (old, new) = self.counters.add(amount);
        let length = self.length();
        if length == 0 {
            return;
        }
        let interval = std::cmp::max(1, length / 10);
        if new / interval > old / interval {
            let phase = self.phase.lock();
            info!("{}: {} {}% ({}/{})", self.name, phase, (new * 100) / length, new, length);
        }
    }

    fn set_length(&self, length: u64) {
        self.counters.length.store(length, Ordering::Relaxed);
    }

    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn position(&self) -> u64 {
        self.counters.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.counters.length.load(Ordering::Relaxed)
    }

    fn finish(&self, message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
        info!("{}: {}", self.name, message);
    }

    fn finish_with_error(&self, message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
        warn!("{}: {}", self.name, message);
    }

    fn is_finished(&self) -> bool {
        self.counters.finished.load(Ordering::Relaxed)
    }
}

/// Terminal progress bar
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::new(0),
        }
    }

    fn style(unit: ProgressUnit) -> BarStyle {
        let template = match unit {
            ProgressUnit::Items => "{msg} [{bar:40}] {pos}/{len} ({eta})",
            ProgressUnit::Bytes => "{msg} [{bar:40}] {bytes}/{total_bytes} {bytes_per_sec}",
        };
        BarStyle::with_template(template)
            .unwrap_or_else(|_| BarStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker for BarProgress {
    fn start(&self, phase: &str, total: u64, unit: ProgressUnit) {
        self.bar.reset();
        self.bar.set_style(Self::style(unit));
        self.bar.set_length(total);
        self.bar.set_message(phase.to_string());
    }

    fn increment(&self, amount: u64) {
        self.bar.inc(amount);
    }

    fn set_length(&self, length: u64) {
        self.bar.set_length(length);
    }

    fn set_message(&self, message: &str) {
        self.bar.println(message);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn length(&self) -> u64 {
        self.bar.length().unwrap_or(0)
    }

    fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }

    fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}

/// Events emitted by [`CallbackProgress`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started { phase: String, total: u64 },
    Position { current: u64, total: u64 },
    Message(String),
    Finished(String),
    Error(String),
}

/// Progress tracker forwarding events to a closure
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
    counters: Counters,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            counters: Counters::default(),
        }
    }
}

impl<F> ProgressTracker for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn start(&self, phase: &str, total: u64, _unit: ProgressUnit) {
        self.counters.reset(total);
        (self.callback)(ProgressEvent::Started {
            phase: phase.to_string(),
            total,
        });
    }

    fn increment(&self, amount: u64) {
        let (_, current) = self.counters.add(amount);
        (self.callback)(ProgressEvent::Position {
            current,
            total: self.length(),
        });
    }

    fn set_length(&self, length: u64) {
        self.counters.length.store(length, Ordering::Relaxed);
    }

    fn set_message(&self, message: &str) {
        (self.callback)(ProgressEvent::Message(message.to_string()));
    }

    fn position(&self) -> u64 {
        self.counters.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.counters.length.load(Ordering::Relaxed)
    }

    fn finish(&self, message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
        (self.callback)(ProgressEvent::Finished(message.to_string()));
    }

    fn finish_with_error(&self, message: &str) {
        self.counters.finished.store(true, Ordering::Relaxed);
        (self.callback)(ProgressEvent::Error(message.to_string()));
    }

    fn is_finished(&self) -> bool {
        self.counters.finished.load(Ordering::Relaxed)
    }
}
