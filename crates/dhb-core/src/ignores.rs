use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::{DhbError, Result};

/// Per-source ignore file, gitignore syntax.
pub const IGNORE_FILENAME: &str = ".dhbignore";

/// Decides which source entries stay out of the backup. Paths are relative
/// to the source root. Skipping a directory prunes its whole subtree.
pub trait IgnorePredicate: Send + Sync {
    fn should_skip(&self, rel_path: &Path, is_dir: bool) -> bool;
}

/// Predicate that keeps everything.
pub struct NoIgnores;

impl IgnorePredicate for NoIgnores {
    fn should_skip(&self, _rel_path: &Path, _is_dir: bool) -> bool {
        false
    }
}

/// The default predicate: rules from `<source>/.dhbignore` when present,
/// otherwise an empty matcher.
pub struct DhbIgnore {
    matcher: Gitignore,
}

impl DhbIgnore {
    pub fn load(source_root: &Path) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(source_root);
        let ignore_file = source_root.join(IGNORE_FILENAME);
        if ignore_file.exists() {
            if let Some(e) = builder.add(&ignore_file) {
                return Err(DhbError::Other(format!(
                    "invalid {}: {e}",
                    ignore_file.display()
                )));
            }
        }
        let matcher = builder
            .build()
            .map_err(|e| DhbError::Other(format!("ignore matcher build failed: {e}")))?;
        Ok(Self { matcher })
    }
}

impl IgnorePredicate for DhbIgnore {
    fn should_skip(&self, rel_path: &Path, is_dir: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(rel_path, is_dir)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_file;

    #[test]
    fn no_ignore_file_skips_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let pred = DhbIgnore::load(tmp.path()).unwrap();
        assert!(!pred.should_skip(Path::new("anything.log"), false));
        assert!(!pred.should_skip(Path::new("dir"), true));
    }

    #[test]
    fn glob_patterns_match() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), IGNORE_FILENAME, b"*.log\ntarget/\n");
        let pred = DhbIgnore::load(tmp.path()).unwrap();

        assert!(pred.should_skip(Path::new("build.log"), false));
        assert!(pred.should_skip(Path::new("deep/nested/build.log"), false));
        assert!(!pred.should_skip(Path::new("build.txt"), false));
        assert!(pred.should_skip(Path::new("target"), true));
    }

    #[test]
    fn files_under_an_ignored_directory_match_via_parents() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), IGNORE_FILENAME, b"cache/\n");
        let pred = DhbIgnore::load(tmp.path()).unwrap();
        assert!(pred.should_skip(Path::new("cache/entry.bin"), false));
    }

    #[test]
    fn negation_rescues_a_path() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), IGNORE_FILENAME, b"*.log\n!keep.log\n");
        let pred = DhbIgnore::load(tmp.path()).unwrap();
        assert!(pred.should_skip(Path::new("other.log"), false));
        assert!(!pred.should_skip(Path::new("keep.log"), false));
    }

    #[test]
    fn the_ignore_file_itself_is_backed_up() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), IGNORE_FILENAME, b"*.log\n");
        let pred = DhbIgnore::load(tmp.path()).unwrap();
        assert!(!pred.should_skip(Path::new(IGNORE_FILENAME), false));
    }
}
