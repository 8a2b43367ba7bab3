use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::error::Result;

const SET_PREFIX: &str = "dhb-set-";
const SET_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// One existing backup set under the destination root, in ascending
/// (oldest-first) order when returned by [`list_sets`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetInfo {
    pub name: String,
    pub path: PathBuf,
    /// Creation instant parsed from the name (UTC). Not taken from
    /// filesystem metadata, so it survives copied or restored trees.
    pub created: DateTime<Utc>,
}

/// Format a set name for the given creation instant: `dhb-set-YYYYMMDD-hhmmss`.
pub fn generate_name(now: DateTime<Utc>) -> String {
    format!("{SET_PREFIX}{}", now.format(SET_TIMESTAMP_FORMAT))
}

/// Strict shape check: `^dhb-set-[0-9]{8}-[0-9]{6}$`.
pub fn is_set_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(SET_PREFIX) else {
        return false;
    };
    let bytes = rest.as_bytes();
    bytes.len() == 15
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[8] == b'-'
        && bytes[9..].iter().all(u8::is_ascii_digit)
}

/// Parse the creation time back out of a set name. `None` when the name
/// does not match the set shape or encodes an impossible timestamp.
pub fn parse_created(name: &str) -> Option<DateTime<Utc>> {
    if !is_set_name(name) {
        return None;
    }
    NaiveDateTime::parse_from_str(&name[SET_PREFIX.len()..], SET_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// All backup sets directly under `dest`, sorted ascending by name.
/// The name encoding is lexicographically sortable, so ascending name
/// order equals chronological order. An empty destination is not an error.
pub fn list_sets(dest: &Path) -> Result<Vec<SetInfo>> {
    let mut sets = Vec::new();
    for entry in fs::read_dir(dest)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(created) = parse_created(name) else {
            if name.starts_with(SET_PREFIX) {
                debug!(name, "directory looks set-like but is not a valid set name");
            }
            continue;
        };
        sets.push(SetInfo {
            name: name.to_string(),
            path: entry.path(),
            created,
        });
    }
    sets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sets)
}

/// Name of the most recent set under `dest`, if any.
pub fn find_latest(dest: &Path) -> Result<Option<String>> {
    Ok(list_sets(dest)?.pop().map(|set| set.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn generates_set_name() {
        let t = Utc.with_ymd_and_hms(2001, 2, 3, 14, 5, 6).unwrap();
        assert_eq!(generate_name(t), "dhb-set-20010203-140506");
    }

    #[test]
    fn name_round_trips_through_parse() {
        let t = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(parse_created(&generate_name(t)), Some(t));
    }

    #[test]
    fn accepts_only_the_exact_shape() {
        assert!(is_set_name("dhb-set-20240101-000000"));
        assert!(!is_set_name("dhb-set-20240101-00000"));
        assert!(!is_set_name("dhb-set-20240101-0000000"));
        assert!(!is_set_name("dhb-set-2024x101-000000"));
        assert!(!is_set_name("dhb-set-20240101_000000"));
        assert!(!is_set_name("xdhb-set-20240101-000000"));
        assert!(!is_set_name("dhb-set-20240101-000000x"));
        assert!(!is_set_name(""));
    }

    #[test]
    fn rejects_impossible_timestamps() {
        // Matches the regex but is not a real instant.
        assert!(is_set_name("dhb-set-20241301-000000"));
        assert_eq!(parse_created("dhb-set-20241301-000000"), None);
    }

    #[test]
    fn lists_sets_sorted_and_skips_strangers() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [
            "dhb-set-20240102-000000",
            "dhb-set-20240101-000000",
            "not-a-set",
            "dhb-set-bogus",
        ] {
            std::fs::create_dir(tmp.path().join(name)).unwrap();
        }
        // A plain file with a set-shaped name must not count.
        std::fs::write(tmp.path().join("dhb-set-20240103-000000"), b"file").unwrap();

        let sets = list_sets(tmp.path()).unwrap();
        let names: Vec<&str> = sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            ["dhb-set-20240101-000000", "dhb-set-20240102-000000"]
        );
        assert_eq!(
            find_latest(tmp.path()).unwrap().as_deref(),
            Some("dhb-set-20240102-000000")
        );
    }

    #[test]
    fn empty_destination_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list_sets(tmp.path()).unwrap().is_empty());
        assert_eq!(find_latest(tmp.path()).unwrap(), None);
    }

    #[test]
    fn missing_destination_surfaces_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("nope");
        assert!(list_sets(&gone).is_err());
    }
}
