use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;

fn dhb() -> Command {
    Command::cargo_bin("dhb").expect("dhb binary should build")
}

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

/// The single backup set created under `dest`.
fn only_set(dest: &Path) -> PathBuf {
    let mut sets: Vec<PathBuf> = fs::read_dir(dest)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(sets.len(), 1, "expected exactly one backup set in {dest:?}");
    sets.pop().unwrap()
}

fn sets_sorted(dest: &Path) -> Vec<PathBuf> {
    let mut sets: Vec<PathBuf> = fs::read_dir(dest)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    sets.sort();
    sets
}

#[test]
fn backs_up_a_single_text_file() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    fs::create_dir(&source).unwrap();
    write_file(&source, "test.txt", b"Hello, backup!");
    let dest = tmp.path().join("backups");

    dhb()
        .arg("--source")
        .arg(&source)
        .arg("--destination")
        .arg(&dest)
        .assert()
        .success();

    let set = only_set(&dest);
    assert_eq!(fs::read(set.join("test.txt")).unwrap(), b"Hello, backup!");
}

#[test]
fn backs_up_nested_folders_and_files() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    fs::create_dir(&source).unwrap();
    write_file(&source, "folder1/folder2/folder3/nested.txt", b"nested content");
    fs::create_dir_all(source.join("empty1/empty2")).unwrap();
    let dest = tmp.path().join("backups");

    dhb()
        .arg("--source")
        .arg(&source)
        .arg("--destination")
        .arg(&dest)
        .assert()
        .success();

    let set = only_set(&dest);
    assert_eq!(
        fs::read_to_string(set.join("folder1/folder2/folder3/nested.txt")).unwrap(),
        "nested content"
    );
    let empty = set.join("empty1/empty2");
    assert!(empty.is_dir(), "empty folders are preserved");
    assert_eq!(fs::read_dir(&empty).unwrap().count(), 0);
}

#[test]
fn set_name_encodes_the_run_time() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    fs::create_dir(&source).unwrap();
    let dest = tmp.path().join("backups");

    let before = chrono::Utc::now().timestamp();
    dhb()
        .arg("--source")
        .arg(&source)
        .arg("--destination")
        .arg(&dest)
        .assert()
        .success();
    let after = chrono::Utc::now().timestamp();

    let set = only_set(&dest);
    let name = set.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("dhb-set-"), "unexpected set name {name}");

    let stamp = chrono::NaiveDateTime::parse_from_str(&name[8..], "%Y%m%d-%H%M%S")
        .expect("set name should parse as a timestamp")
        .and_utc()
        .timestamp();
    assert!(
        stamp >= before && stamp <= after,
        "set timestamp {stamp} outside the run window [{before}, {after}]"
    );
}

#[test]
fn writes_an_md5sum_compatible_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    fs::create_dir(&source).unwrap();
    write_file(&source, "testfile.txt", b"backmeup susie\n");
    let dest = tmp.path().join("backups");

    dhb()
        .arg("--source")
        .arg(&source)
        .arg("--destination")
        .arg(&dest)
        .assert()
        .success();

    let set = only_set(&dest);
    let manifest = fs::read_to_string(set.join("disk-hog-backup-hashes.md5")).unwrap();
    let expected = format!("{:x}  testfile.txt\n", md5::compute(b"backmeup susie\n"));
    assert_eq!(manifest, expected);

    let sidecar = fs::read_to_string(set.join("disk-hog-backup-hashes.md5.md5")).unwrap();
    assert_eq!(
        sidecar,
        format!(
            "{:x}  disk-hog-backup-hashes.md5\n",
            md5::compute(manifest.as_bytes())
        )
    );
}

#[cfg(unix)]
#[test]
fn second_run_hard_links_unchanged_files() {
    use std::os::unix::fs::MetadataExt;

    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    fs::create_dir(&source).unwrap();
    write_file(&source, "linkme.txt", b"hello go");
    let dest = tmp.path().join("backups");

    for _ in 0..2 {
        // Runs within the same second would collide on the set name;
        // space them out.
        dhb()
            .arg("--source")
            .arg(&source)
            .arg("--destination")
            .arg(&dest)
            .assert()
            .success();
        std::thread::sleep(std::time::Duration::from_millis(1100));
    }

    let sets = sets_sorted(&dest);
    assert_eq!(sets.len(), 2);
    let first = fs::metadata(sets[0].join("linkme.txt")).unwrap();
    let second = fs::metadata(sets[1].join("linkme.txt")).unwrap();
    assert_eq!(first.ino(), second.ino(), "unchanged file should share an inode");
    assert_eq!(first.nlink(), 2);
}

#[test]
fn dhbignore_excludes_patterns() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    fs::create_dir(&source).unwrap();
    write_file(&source, ".dhbignore", b"*.log\n");
    write_file(&source, "keep.txt", b"keep");
    write_file(&source, "drop.log", b"drop");
    let dest = tmp.path().join("backups");

    dhb()
        .arg("--source")
        .arg(&source)
        .arg("--destination")
        .arg(&dest)
        .assert()
        .success();

    let set = only_set(&dest);
    assert!(set.join("keep.txt").exists());
    assert!(!set.join("drop.log").exists());
}

#[test]
fn missing_source_fails_with_nonzero_exit() {
    let tmp = tempfile::tempdir().unwrap();
    dhb()
        .arg("--source")
        .arg(tmp.path().join("does-not-exist"))
        .arg("--destination")
        .arg(tmp.path().join("backups"))
        .assert()
        .failure();
}

#[test]
fn missing_flags_are_a_usage_error() {
    dhb().assert().failure();
    dhb().arg("--source").arg("/tmp").assert().failure();
}
