/// Cap on chunk bytes buffered across all in-flight pipelines.
pub const DEFAULT_MEMORY_CAP: u64 = 4 * 1024 * 1024 * 1024; // 4 GiB

/// Free space kept in reserve on top of each file's size.
pub const DEFAULT_SAFETY_MARGIN: u64 = 64 * 1024 * 1024; // 64 MiB

/// Exponent applied to the reciprocal-gap deletion weight. Higher values
/// skew reclamation further towards closely-spaced sets.
pub const DEFAULT_DELETE_EXPONENT: f64 = 2.0;

/// Tunables for a backup run.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Delete older backup sets when the destination runs short of space.
    pub auto_delete: bool,
    /// Global cap on buffered chunk bytes, enforced by the accountant.
    pub memory_cap: u64,
    /// Minimum free space kept on top of the next file's size.
    pub safety_margin: u64,
    /// Weight exponent for weighted-random set reclamation.
    pub delete_exponent: f64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            auto_delete: false,
            memory_cap: DEFAULT_MEMORY_CAP,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            delete_exponent: DEFAULT_DELETE_EXPONENT,
        }
    }
}
