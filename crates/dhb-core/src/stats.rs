use std::sync::atomic::{AtomicU64, Ordering};

use bytesize::ByteSize;
use tracing::info;

/// Counters shared across the walker and the pipeline threads of a run.
/// All updates are relaxed; the struct is only read coherently after the
/// run joins its workers.
#[derive(Debug, Default)]
pub struct BackupStats {
    files_copied: AtomicU64,
    files_hard_linked: AtomicU64,
    dirs_created: AtomicU64,
    entries_ignored: AtomicU64,
    entries_skipped: AtomicU64,
    soft_errors: AtomicU64,
    bytes_copied: AtomicU64,
    bytes_hard_linked: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    sets_reclaimed: AtomicU64,
}

impl BackupStats {
    pub fn add_file_copied(&self, bytes: u64) {
        self.files_copied.fetch_add(1, Ordering::Relaxed);
        self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_file_hard_linked(&self, bytes: u64) {
        self.files_hard_linked.fetch_add(1, Ordering::Relaxed);
        self.bytes_hard_linked.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_dir_created(&self) {
        self.dirs_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Entry excluded by the ignore predicate.
    pub fn add_entry_ignored(&self) {
        self.entries_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Symlink or special file skipped by policy.
    pub fn add_entry_skipped(&self) {
        self.entries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_soft_error(&self) {
        self.soft_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_set_reclaimed(&self) {
        self.sets_reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_copied: self.files_copied.load(Ordering::Relaxed),
            files_hard_linked: self.files_hard_linked.load(Ordering::Relaxed),
            dirs_created: self.dirs_created.load(Ordering::Relaxed),
            entries_ignored: self.entries_ignored.load(Ordering::Relaxed),
            entries_skipped: self.entries_skipped.load(Ordering::Relaxed),
            soft_errors: self.soft_errors.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            bytes_hard_linked: self.bytes_hard_linked.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            sets_reclaimed: self.sets_reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of the counters at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub files_copied: u64,
    pub files_hard_linked: u64,
    pub dirs_created: u64,
    pub entries_ignored: u64,
    pub entries_skipped: u64,
    pub soft_errors: u64,
    pub bytes_copied: u64,
    pub bytes_hard_linked: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub sets_reclaimed: u64,
}

impl StatsSnapshot {
    pub fn log_summary(&self) {
        info!(
            copied = self.files_copied,
            hard_linked = self.files_hard_linked,
            dirs = self.dirs_created,
            ignored = self.entries_ignored,
            skipped = self.entries_skipped,
            errors = self.soft_errors,
            "backup finished: {} copied, {} linked",
            ByteSize(self.bytes_copied),
            ByteSize(self.bytes_hard_linked),
        );
        if self.sets_reclaimed > 0 {
            info!(sets = self.sets_reclaimed, "older backup sets were reclaimed for space");
        }
    }
}
