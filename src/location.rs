use crate::util::lock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Interned handle to an absolute file path. Zero is never handed out.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FileId(pub u32);

impl FileId {
    pub const NONE: FileId = FileId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// A point in a file, totally ordered so every location within one file is
/// contiguous and ascending in an ordered map.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Location {
    pub file_id: FileId,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file_id: FileId, line: u32, column: u32) -> Self {
        Self {
            file_id,
            line,
            column,
        }
    }

    /// The smallest location inside `file_id`, usable as a range-scan lower
    /// bound.
    pub fn start_of(file_id: FileId) -> Self {
        Self::new(file_id, 1, 1)
    }

    /// The exclusive upper bound for range scans over `file_id`.
    pub fn end_of(file_id: FileId) -> Self {
        Self::new(FileId(file_id.0.wrapping_add(1)), 0, 0)
    }

    pub fn is_valid(self) -> bool {
        self.file_id.is_valid()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file_id.0, self.line, self.column)
    }
}

struct PathTableInner {
    ids: HashMap<PathBuf, FileId>,
    // index 0 is a placeholder so FileId(0) stays invalid
    paths: Vec<PathBuf>,
}

/// Process-wide path interner. Ids are monotonic and never recycled; paths
/// are resolved before interning so two spellings of one file share an id.
///
/// Constructed once by the host and handed to every project; lives for the
/// duration of the process.
pub struct PathTable {
    inner: Mutex<PathTableInner>,
}

impl Default for PathTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PathTableInner {
                ids: HashMap::new(),
                paths: vec![PathBuf::new()],
            }),
        }
    }

    /// Interns `path`, resolving it first. Returns the existing id when the
    /// resolved path has been seen before.
    pub fn insert(&self, path: &Path) -> FileId {
        let resolved = resolve(path);
        let mut inner = lock(&self.inner);
        if let Some(&id) = inner.ids.get(&resolved) {
            return id;
        }
        let id = FileId(inner.paths.len() as u32);
        inner.paths.push(resolved.clone());
        inner.ids.insert(resolved, id);
        id
    }

    /// Non-interning lookup.
    pub fn file_id(&self, path: &Path) -> Option<FileId> {
        let resolved = resolve(path);
        lock(&self.inner).ids.get(&resolved).copied()
    }

    pub fn path(&self, id: FileId) -> Option<PathBuf> {
        if !id.is_valid() {
            return None;
        }
        lock(&self.inner).paths.get(id.0 as usize).cloned()
    }

    /// All interned (id, path) pairs, for persistence.
    pub fn snapshot(&self) -> Vec<(u32, PathBuf)> {
        let inner = lock(&self.inner);
        inner
            .paths
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, p)| (i as u32, p.clone()))
            .collect()
    }
}

fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    if path.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            return cwd.join(path);
        }
    }
    path.to_path_buf()
}
