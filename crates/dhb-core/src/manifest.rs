use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{DhbError, Result};

/// Per-set index of content hashes, `md5sum -c` compatible.
pub const MANIFEST_FILENAME: &str = "disk-hog-backup-hashes.md5";

/// Sidecar holding the md5 of the manifest file itself.
pub const SIDECAR_FILENAME: &str = "disk-hog-backup-hashes.md5.md5";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub rel_path: PathBuf,
    pub md5: [u8; 16],
}

/// The content-hash index of one backup set. Entries keep the order they
/// were recorded in — the deterministic walk order — so two manifests of
/// an unchanged source are byte-identical and diffable.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    index: HashMap<PathBuf, usize>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    pub fn hash_for(&self, rel_path: &Path) -> Option<&[u8; 16]> {
        self.index.get(rel_path).map(|&i| &self.entries[i].md5)
    }

    /// Record a file's hash. Paths are unique; recording a path twice
    /// overwrites in place.
    pub fn record(&mut self, rel_path: &Path, md5: [u8; 16]) {
        if let Some(&i) = self.index.get(rel_path) {
            self.entries[i].md5 = md5;
            return;
        }
        self.index.insert(rel_path.to_path_buf(), self.entries.len());
        self.entries.push(ManifestEntry {
            rel_path: rel_path.to_path_buf(),
            md5,
        });
    }

    /// Load the manifest of a backup set.
    ///
    /// Returns `Ok(None)` when the set carries no manifest (a crashed
    /// earlier run). When the sidecar is present its digest must match the
    /// manifest bytes, and every line must parse; anything else is
    /// [`DhbError::ManifestCorrupt`].
    pub fn load(set_root: &Path) -> Result<Option<Manifest>> {
        let manifest_path = set_root.join(MANIFEST_FILENAME);
        let bytes = match fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let sidecar_path = set_root.join(SIDECAR_FILENAME);
        match fs::read_to_string(&sidecar_path) {
            Ok(sidecar) => {
                let recorded = sidecar.split_whitespace().next().unwrap_or("");
                let actual = hex::encode(md5::compute(&bytes).0);
                if recorded != actual {
                    return Err(DhbError::ManifestCorrupt {
                        path: manifest_path,
                        reason: format!(
                            "sidecar digest {recorded} does not match manifest digest {actual}"
                        ),
                    });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let text = String::from_utf8(bytes).map_err(|_| DhbError::ManifestCorrupt {
            path: manifest_path.clone(),
            reason: "manifest is not valid UTF-8".into(),
        })?;

        let mut manifest = Manifest::new();
        for (lineno, line) in text.lines().enumerate() {
            let (md5, rel_path) =
                parse_line(line).ok_or_else(|| DhbError::ManifestCorrupt {
                    path: manifest_path.clone(),
                    reason: format!("unparseable line {}", lineno + 1),
                })?;
            if manifest.index.contains_key(&rel_path) {
                return Err(DhbError::ManifestCorrupt {
                    path: manifest_path.clone(),
                    reason: format!("duplicate path on line {}", lineno + 1),
                });
            }
            manifest.record(&rel_path, md5);
        }
        Ok(Some(manifest))
    }

    /// Write the manifest into `set_root`, then the sidecar with the
    /// manifest file's own md5. Called once, after the walk completes, so
    /// a crashed run is recognizable by the missing manifest.
    pub fn save(&self, set_root: &Path) -> Result<()> {
        let mut body = String::new();
        for entry in &self.entries {
            body.push_str(&format_line(&entry.rel_path, &entry.md5));
        }

        let manifest_path = set_root.join(MANIFEST_FILENAME);
        let mut file = fs::File::create(&manifest_path)?;
        file.write_all(body.as_bytes())?;

        let digest = hex::encode(md5::compute(body.as_bytes()).0);
        let mut sidecar = fs::File::create(set_root.join(SIDECAR_FILENAME))?;
        writeln!(sidecar, "{digest}  {MANIFEST_FILENAME}")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Line format
// ---------------------------------------------------------------------------
//
// `<32 hex chars><two spaces><path>\n`, with GNU md5sum's backslash
// convention: paths containing `\`, `\n` or `\r` are escaped and the whole
// line is prefixed with `\`.

fn needs_escaping(path: &str) -> bool {
    path.contains('\\') || path.contains('\n') || path.contains('\r')
}

fn escape_path(path: &str) -> String {
    path.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

fn unescape_path(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn format_line(rel_path: &Path, md5: &[u8; 16]) -> String {
    let path = rel_path.to_string_lossy();
    let hex = hex::encode(md5);
    if needs_escaping(&path) {
        format!("\\{hex}  {}\n", escape_path(&path))
    } else {
        format!("{hex}  {path}\n")
    }
}

fn parse_line(line: &str) -> Option<([u8; 16], PathBuf)> {
    let (escaped, line) = match line.strip_prefix('\\') {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    let (hex_digest, path) = line.split_once("  ")?;
    if hex_digest.len() != 32 {
        return None;
    }
    let mut md5 = [0u8; 16];
    hex::decode_to_slice(hex_digest, &mut md5).ok()?;
    if path.is_empty() {
        return None;
    }
    let path = if escaped {
        unescape_path(path)
    } else {
        path.to_string()
    };
    Some((md5, PathBuf::from(path)))
}
