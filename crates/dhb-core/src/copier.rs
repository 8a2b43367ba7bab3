use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytesize::ByteSize;
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::accountant::MemoryAccountant;
use crate::error::{DhbError, Result};
use crate::ignores::IgnorePredicate;
use crate::manifest::Manifest;
use crate::pipeline::{self, CopyFlag, FileCopyJob, PrevFileRecord};
use crate::platform::{self, FileKind};
use crate::space::SpaceManager;
use crate::stats::BackupStats;

/// The hard-link base: the most recent prior set and its manifest.
#[derive(Debug)]
pub struct PrevSet {
    pub root: PathBuf,
    pub manifest: Manifest,
}

impl PrevSet {
    /// Build the previous-file record for `rel_path`: hash from the
    /// manifest, (size, mtime) from a fresh stat of the previous copy.
    /// `None` when the path is unknown to the manifest or the previous
    /// copy is missing or no longer a regular file.
    pub fn record_for(&self, rel_path: &Path) -> Option<PrevFileRecord> {
        let md5 = *self.manifest.hash_for(rel_path)?;
        let abs_path = self.root.join(rel_path);
        let metadata = fs::symlink_metadata(&abs_path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some(PrevFileRecord {
            size: metadata.len(),
            mtime_ns: platform::mtime_ns(&metadata),
            md5,
            abs_path,
        })
    }
}

/// A per-file failure the walk recorded and continued past.
#[derive(Debug)]
pub struct FileFailure {
    pub rel_path: PathBuf,
    pub error: DhbError,
}

/// What the walk produced besides the manifest.
#[derive(Debug, Default)]
pub struct CopyReport {
    pub failures: Vec<FileFailure>,
}

/// Mirror `source` into `dest` (the new set root, which must exist).
///
/// Entries within each directory are visited in ascending byte order of
/// their names, so the manifest produced by an unchanged source is
/// byte-identical across runs. Directories are created as encountered,
/// regular files go through the streaming pipeline, symlinks and special
/// files are logged and skipped. Recoverable per-file errors are collected
/// into the report; fatal errors abort the walk.
#[allow(clippy::too_many_arguments)]
pub fn copy_tree(
    source: &Path,
    dest: &Path,
    prev: Option<&PrevSet>,
    ignores: Arc<dyn IgnorePredicate>,
    accountant: &MemoryAccountant,
    stats: &Arc<BackupStats>,
    space: &mut SpaceManager,
    manifest: &mut Manifest,
) -> Result<CopyReport> {
    let mut report = CopyReport::default();
    let walker = configure_walker(source, ignores, stats);

    for entry in walker.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "walk error, continuing");
                stats.add_soft_error();
                report.failures.push(FileFailure {
                    rel_path: PathBuf::new(),
                    error: DhbError::Other(format!("walk error: {e}")),
                });
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let rel_path = match entry.path().strip_prefix(source) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        let Some(file_type) = entry.file_type() else {
            continue;
        };

        match FileKind::of(&file_type) {
            FileKind::Dir => {
                let dst = dest.join(&rel_path);
                fs::create_dir_all(&dst).map_err(|source| DhbError::CreateDestination {
                    path: dst.clone(),
                    source,
                })?;
                stats.add_dir_created();
            }
            FileKind::File => {
                if let Err(error) = copy_one_file(
                    source, dest, &rel_path, prev, accountant, stats, space, manifest,
                ) {
                    if error.is_fatal() {
                        return Err(error);
                    }
                    warn!(path = %rel_path.display(), error = %error, "file failed, continuing");
                    stats.add_soft_error();
                    report.failures.push(FileFailure { rel_path, error });
                }
            }
            kind @ (FileKind::Symlink | FileKind::Other) => {
                info!(path = %rel_path.display(), kind = kind.label(), "skipping unsupported entry");
                stats.add_entry_skipped();
            }
        }
    }

    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn copy_one_file(
    source: &Path,
    dest: &Path,
    rel_path: &Path,
    prev: Option<&PrevSet>,
    accountant: &MemoryAccountant,
    stats: &Arc<BackupStats>,
    space: &mut SpaceManager,
    manifest: &mut Manifest,
) -> Result<()> {
    let src = source.join(rel_path);
    let metadata = fs::symlink_metadata(&src).map_err(|e| DhbError::OpenSource {
        path: src.clone(),
        source: e,
    })?;
    debug!(
        path = %rel_path.display(),
        size = %ByteSize(metadata.len()),
        "processing file"
    );

    let dst = dest.join(rel_path);
    let prev_record = prev.and_then(|p| p.record_for(rel_path));
    let job = FileCopyJob {
        source: &src,
        dest: &dst,
        metadata: &metadata,
        prev: prev_record.as_ref(),
    };
    let flag = CopyFlag::new();
    let outcome = pipeline::copy_file(&job, &flag, accountant, stats, space)?;
    manifest.record(rel_path, outcome.hash);
    Ok(())
}

fn configure_walker(
    source: &Path,
    ignores: Arc<dyn IgnorePredicate>,
    stats: &Arc<BackupStats>,
) -> WalkBuilder {
    let mut builder = WalkBuilder::new(source);
    builder.follow_links(false);
    builder.hidden(false);
    builder.ignore(false);
    builder.git_global(false);
    builder.git_exclude(false);
    builder.git_ignore(false);
    builder.parents(false);
    builder.require_git(false);
    builder.sort_by_file_name(std::ffi::OsStr::cmp);

    let root = source.to_path_buf();
    let stats = Arc::clone(stats);
    builder.filter_entry(move |entry| {
        let path = entry.path();
        if path == root {
            return true;
        }
        let rel = path.strip_prefix(&root).unwrap_or(path);
        let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
        if ignores.should_skip(rel, is_dir) {
            debug!(path = %rel.display(), "ignoring entry");
            stats.add_entry_ignored();
            return false;
        }
        true
    });
    builder
}
