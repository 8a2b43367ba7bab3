use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use tracing::{info, warn};

use crate::accountant::MemoryAccountant;
use crate::config::BackupConfig;
use crate::copier::{self, FileFailure, PrevSet};
use crate::error::{DhbError, Result};
use crate::ignores::{DhbIgnore, IgnorePredicate};
use crate::manifest::Manifest;
use crate::sets;
use crate::space::{SpaceChecker, SpaceManager, StatvfsChecker};
use crate::stats::{BackupStats, StatsSnapshot};

/// One backup invocation.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub config: BackupConfig,
}

/// What a finished run looked like.
#[derive(Debug)]
pub struct BackupSummary {
    pub set_name: String,
    pub set_path: PathBuf,
    pub stats: StatsSnapshot,
    pub failures: Vec<FileFailure>,
}

impl BackupSummary {
    /// `true` when some files were skipped over recoverable errors.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Run a backup with production collaborators: the current time, the
/// statvfs space checker, the OS RNG and the source's `.dhbignore` rules.
pub fn run(request: &BackupRequest) -> Result<BackupSummary> {
    let ignores: Arc<dyn IgnorePredicate> = Arc::new(DhbIgnore::load(&request.source)?);
    run_with(
        request,
        Utc::now(),
        Arc::new(MemoryAccountant::new(request.config.memory_cap)),
        Box::new(StatvfsChecker),
        Box::new(rand::thread_rng()),
        ignores,
    )
}

/// [`run`] with every collaborator injected, for tests and embedding.
pub fn run_with(
    request: &BackupRequest,
    now: DateTime<Utc>,
    accountant: Arc<MemoryAccountant>,
    checker: Box<dyn SpaceChecker>,
    rng: Box<dyn RngCore>,
    ignores: Arc<dyn IgnorePredicate>,
) -> Result<BackupSummary> {
    let source = &request.source;
    let source_meta = fs::metadata(source).map_err(|e| DhbError::OpenSource {
        path: source.clone(),
        source: e,
    })?;
    if !source_meta.is_dir() {
        return Err(DhbError::Other(format!(
            "source is not a directory: {}",
            source.display()
        )));
    }

    let dest = &request.dest;
    fs::create_dir_all(dest).map_err(|e| DhbError::CreateDestination {
        path: dest.clone(),
        source: e,
    })?;

    let prev = find_hard_link_base(dest)?;

    let set_name = sets::generate_name(now);
    let set_path = dest.join(&set_name);
    fs::create_dir(&set_path).map_err(|e| DhbError::CreateDestination {
        path: set_path.clone(),
        source: e,
    })?;
    info!(
        source = %source.display(),
        set = %set_path.display(),
        "backing up"
    );

    let stats = Arc::new(BackupStats::default());
    let mut space = SpaceManager::new(
        dest,
        &request.config,
        vec![set_name.clone()],
        checker,
        rng,
        Arc::clone(&stats),
    );

    let mut manifest = Manifest::new();
    let report = copier::copy_tree(
        source,
        &set_path,
        prev.as_ref(),
        ignores,
        &accountant,
        &stats,
        &mut space,
        &mut manifest,
    )?;

    manifest.save(&set_path)?;

    let stats = stats.snapshot();
    stats.log_summary();
    if !report.failures.is_empty() {
        warn!(
            failed = report.failures.len(),
            "backup finished with per-file failures"
        );
    }

    Ok(BackupSummary {
        set_name,
        set_path,
        stats,
        failures: report.failures,
    })
}

/// The most recent prior set together with its manifest. A set without a
/// readable manifest is non-authoritative (a crashed run, or corruption)
/// and is not used as a hard-link base at all.
fn find_hard_link_base(dest: &Path) -> Result<Option<PrevSet>> {
    let Some(name) = sets::find_latest(dest)? else {
        info!("no previous backup set, everything will be copied");
        return Ok(None);
    };
    let root = dest.join(&name);
    match Manifest::load(&root) {
        Ok(Some(manifest)) => {
            info!(set = %name, files = manifest.len(), "hard-linking against previous set");
            Ok(Some(PrevSet { root, manifest }))
        }
        Ok(None) => {
            warn!(set = %name, "previous set has no manifest, not using it as hard-link base");
            Ok(None)
        }
        Err(e) => {
            warn!(set = %name, error = %e, "previous manifest failed verification, not using it");
            Ok(None)
        }
    }
}
