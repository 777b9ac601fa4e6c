use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Daemon options consumed by the indexing core.
///
/// The surrounding daemon populates this from its own option sources; the
/// core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Number of worker threads running parse jobs.
    pub thread_pool_size: usize,
    /// Stack size for the parse workers, 0 for the platform default.
    pub thread_pool_stack_size: usize,
    /// Bound of the translation-unit cache.
    pub unit_cache_size: usize,
    /// Directory holding the persisted per-project databases.
    pub data_dir: PathBuf,
    /// Include path shipped with the bundled compiler headers, prepended to
    /// every parse invocation when set.
    pub bundled_include_path: Option<PathBuf>,
    /// Register watches for directories under system prefixes.
    pub watch_system_paths: bool,
    /// Keep multiple builds per source file instead of replacing the first.
    pub allow_multiple_builds: bool,
    /// Run the database consistency check after every sync.
    pub validate: bool,
    /// Skip reacting to file creation events.
    pub no_file_manager_watch: bool,
    /// Drop fix-its whose replacement is a bare printf conversion.
    pub ignore_printf_fixits: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            thread_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            thread_pool_stack_size: 0,
            unit_cache_size: 5,
            data_dir: default_data_dir(),
            bundled_include_path: None,
            watch_system_paths: false,
            allow_multiple_builds: false,
            validate: false,
            no_file_manager_watch: false,
            ignore_printf_fixits: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".clangscope/projects")
}

/// Environment variable restricting which source files may be indexed; when
/// set, index requests whose path does not contain the value are rejected.
pub const FILE_FILTER_ENV: &str = "CLANGSCOPE_FILE_FILTER";
