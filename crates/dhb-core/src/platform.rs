use std::fs::Metadata;
use std::io;
use std::path::Path;

use filetime::FileTime;

/// Classification of a walked source entry. Only directories and regular
/// files are backed up; the rest are logged and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Dir,
    File,
    Symlink,
    Other,
}

impl FileKind {
    pub fn of(file_type: &std::fs::FileType) -> FileKind {
        if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Dir
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FileKind::Dir => "dir",
            FileKind::File => "file",
            FileKind::Symlink => "symlink",
            FileKind::Other => "other",
        }
    }
}

/// Modification time as nanoseconds since the Unix epoch.
///
/// The fast-path compares this value between the live source and the
/// previous set's copy, so it must use the full precision the filesystem
/// stores — second-truncated times would produce false matches.
pub fn mtime_ns(metadata: &Metadata) -> i64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec()
    }

    #[cfg(not(unix))]
    {
        let mtime = FileTime::from_last_modification_time(metadata);
        mtime.unix_seconds() * 1_000_000_000 + i64::from(mtime.nanoseconds())
    }
}

/// Carry the source's permissions and timestamps over to a freshly copied
/// destination file. Without the mtime restore, the next run's (size, mtime)
/// shortcut could never fire.
pub fn restore_metadata(source_metadata: &Metadata, dest: &Path) -> io::Result<()> {
    std::fs::set_permissions(dest, source_metadata.permissions())?;
    let atime = FileTime::from_last_access_time(source_metadata);
    let mtime = FileTime::from_last_modification_time(source_metadata);
    filetime::set_file_times(dest, atime, mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn classifies_file_types() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, b"x").unwrap();
        let dir = tmp.path().join("d");
        fs::create_dir(&dir).unwrap();

        let ft = fs::symlink_metadata(&file).unwrap().file_type();
        assert_eq!(FileKind::of(&ft), FileKind::File);
        let ft = fs::symlink_metadata(&dir).unwrap().file_type();
        assert_eq!(FileKind::of(&ft), FileKind::Dir);

        #[cfg(unix)]
        {
            let link = tmp.path().join("l");
            std::os::unix::fs::symlink(&file, &link).unwrap();
            let ft = fs::symlink_metadata(&link).unwrap().file_type();
            assert_eq!(FileKind::of(&ft), FileKind::Symlink);
        }
    }

    #[test]
    fn restore_metadata_carries_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::write(&src, b"hello").unwrap();
        fs::write(&dst, b"hello").unwrap();

        // Push the source's mtime into the past so the two differ.
        let past = FileTime::from_unix_time(1_000_000_000, 123_456_789);
        filetime::set_file_mtime(&src, past).unwrap();

        let src_meta = fs::metadata(&src).unwrap();
        restore_metadata(&src_meta, &dst).unwrap();

        let dst_meta = fs::metadata(&dst).unwrap();
        assert_eq!(mtime_ns(&src_meta), mtime_ns(&dst_meta));
    }
}
