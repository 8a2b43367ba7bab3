use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::BackupConfig;
use crate::space::{SpaceChecker, SpaceManager};
use crate::stats::BackupStats;

/// Write `contents` to `dir/name`, creating parents, returning the path.
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

pub fn md5_of(bytes: &[u8]) -> [u8; 16] {
    md5::compute(bytes).0
}

/// Inode identity, the observable effect of a hard link.
#[cfg(unix)]
pub fn same_inode(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let ma = fs::metadata(a).unwrap();
    let mb = fs::metadata(b).unwrap();
    ma.dev() == mb.dev() && ma.ino() == mb.ino()
}

/// Checker that never reports pressure.
pub struct UnlimitedSpace;

impl SpaceChecker for UnlimitedSpace {
    fn available(&self, _path: &Path) -> crate::Result<u64> {
        Ok(u64::MAX)
    }

    fn total(&self, _path: &Path) -> crate::Result<u64> {
        Ok(u64::MAX)
    }
}

/// A space manager that always has room, for tests exercising other parts.
pub fn unlimited_space_manager(dest: &Path) -> SpaceManager {
    SpaceManager::new(
        dest,
        &BackupConfig::default(),
        Vec::new(),
        Box::new(UnlimitedSpace),
        Box::new(rand::thread_rng()),
        Arc::new(BackupStats::default()),
    )
}
