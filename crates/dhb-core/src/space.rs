use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::{Rng, RngCore};
use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::error::{DhbError, Result};
use crate::sets::{self, SetInfo};
use crate::stats::BackupStats;

// ---------------------------------------------------------------------------
// Disk-free queries
// ---------------------------------------------------------------------------

/// Filesystem capacity queries, injected so tests can simulate pressure.
pub trait SpaceChecker: Send + Sync {
    fn available(&self, path: &Path) -> Result<u64>;
    fn total(&self, path: &Path) -> Result<u64>;
}

/// Production checker backed by `fstatvfs(2)`.
pub struct StatvfsChecker;

impl SpaceChecker for StatvfsChecker {
    fn available(&self, path: &Path) -> Result<u64> {
        Ok(filesystem_stats(path)?.available)
    }

    fn total(&self, path: &Path) -> Result<u64> {
        Ok(filesystem_stats(path)?.total)
    }
}

struct FilesystemStats {
    total: u64,
    available: u64,
}

#[cfg(unix)]
fn filesystem_stats(path: &Path) -> std::io::Result<FilesystemStats> {
    use std::os::unix::io::AsRawFd;

    // statvfs wants a descriptor; open the directory itself (or the parent
    // when handed a file path).
    let dir = if path.is_dir() {
        fs::File::open(path)?
    } else {
        let parent = path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
        })?;
        fs::File::open(parent)?
    };

    // SAFETY: `stat` is a plain C struct with no invariants, so zeroing it
    // is a valid initial state, and the descriptor stays open across the
    // call because `dir` outlives it.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::fstatvfs(dir.as_raw_fd(), &mut stat) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }

    let block = stat.f_frsize as u64;
    Ok(FilesystemStats {
        total: stat.f_blocks as u64 * block,
        available: stat.f_bavail as u64 * block,
    })
}

#[cfg(not(unix))]
fn filesystem_stats(_path: &Path) -> std::io::Result<FilesystemStats> {
    // No statvfs off unix; report unbounded space so backups proceed.
    Ok(FilesystemStats {
        total: u64::MAX,
        available: u64::MAX,
    })
}

// ---------------------------------------------------------------------------
// Reclamation weights
// ---------------------------------------------------------------------------

/// Deletion weight for a set separated from its predecessor by
/// `gap_days`: `(1 / gap)^exponent`. Closely-spaced sets weigh more,
/// sparse (usually old) history weighs less.
fn deletion_weight(gap_days: f64, exponent: f64) -> f64 {
    if gap_days <= 0.0 {
        return 0.0;
    }
    (1.0 / gap_days).powf(exponent)
}

/// Weights for `sets` (ascending time order). The oldest set has no
/// predecessor and falls back to its gap since the Unix epoch, which keeps
/// it eligible but very unlikely.
fn deletion_weights(sets: &[SetInfo], exponent: f64) -> Vec<f64> {
    sets.iter()
        .enumerate()
        .map(|(i, set)| {
            let gap_seconds = if i == 0 {
                set.created.timestamp().max(0)
            } else {
                (set.created - sets[i - 1].created).num_seconds().max(0)
            };
            deletion_weight(gap_seconds as f64 / 86_400.0, exponent)
        })
        .collect()
}

/// Weighted-random pick over `candidates`. Deterministic for a given RNG
/// state and candidate list.
fn pick_weighted(candidates: &[SetInfo], weights: &[f64], rng: &mut dyn RngCore) -> usize {
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        // Degenerate weights (all zero): fall back to the oldest.
        return 0;
    }
    let roll: f64 = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for (i, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if roll < cumulative {
            return i;
        }
    }
    candidates.len() - 1
}

// ---------------------------------------------------------------------------
// Space manager
// ---------------------------------------------------------------------------

/// Keeps the destination viable during a run: checks free space just in
/// time before each streamed file, and — when `auto_delete` is on —
/// reclaims whole older sets chosen by weighted random until the next file
/// fits. The set being written and the most recent prior set (the
/// hard-link base) are never candidates.
pub struct SpaceManager {
    dest_root: PathBuf,
    auto_delete: bool,
    safety_margin: u64,
    exponent: f64,
    /// Set names never eligible for deletion (the in-progress set).
    protected: Vec<String>,
    checker: Box<dyn SpaceChecker>,
    rng: Box<dyn RngCore>,
    stats: Arc<BackupStats>,
}

impl SpaceManager {
    pub fn new(
        dest_root: &Path,
        config: &BackupConfig,
        protected: Vec<String>,
        checker: Box<dyn SpaceChecker>,
        rng: Box<dyn RngCore>,
        stats: Arc<BackupStats>,
    ) -> Self {
        Self {
            dest_root: dest_root.to_path_buf(),
            auto_delete: config.auto_delete,
            safety_margin: config.safety_margin,
            exponent: config.delete_exponent,
            protected,
            checker,
            rng,
            stats,
        }
    }

    /// Fail, or return with at least `bytes + safety_margin` available on
    /// the destination filesystem, deleting older sets along the way when
    /// allowed.
    pub fn ensure_room_for(&mut self, bytes: u64) -> Result<()> {
        let needed = bytes.saturating_add(self.safety_margin);
        let mut reclaimed_any = false;

        loop {
            let available = self.checker.available(&self.dest_root)?;
            if available >= needed {
                return Ok(());
            }
            if !self.auto_delete {
                return Err(DhbError::OutOfSpace { needed, available });
            }

            let candidates = self.candidates()?;
            if candidates.is_empty() {
                return Err(if reclaimed_any {
                    DhbError::OutOfSpace { needed, available }
                } else {
                    DhbError::ReclaimExhausted
                });
            }

            let weights = deletion_weights(&candidates, self.exponent);
            let victim = &candidates[pick_weighted(&candidates, &weights, &mut *self.rng)];
            info!(set = %victim.name, "destination is low on space, deleting older backup set");
            fs::remove_dir_all(&victim.path)?;
            self.stats.add_set_reclaimed();
            reclaimed_any = true;
        }
    }

    /// Deletable sets in ascending time order: everything under the
    /// destination except protected names and the most recent remaining
    /// set, which stays as the hard-link base.
    fn candidates(&self) -> Result<Vec<SetInfo>> {
        let mut sets = sets::list_sets(&self.dest_root)?;
        sets.retain(|set| !self.protected.contains(&set.name));
        if sets.len() <= 1 {
            debug!("no deletable backup sets besides the hard-link base");
            return Ok(Vec::new());
        }
        let kept = sets.pop();
        if let Some(kept) = kept {
            debug!(set = %kept.name, "most recent prior set is preserved");
        }
        Ok(sets)
    }
}
