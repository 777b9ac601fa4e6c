use crate::location::FileId;
use crate::util::lock;
use lasso::{Key, Spur, ThreadedRodeo};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;

/// Interned handle to a clang Unified Symbol Resolution string.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UsrId(pub u32);

/// Process-wide USR interner. Ids are monotonic and never recycled, so
/// readers can hold on to an id without further coordination.
pub struct UsrTable {
    rodeo: ThreadedRodeo,
}

impl Default for UsrTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UsrTable {
    pub fn new() -> Self {
        Self {
            rodeo: ThreadedRodeo::new(),
        }
    }

    pub fn insert(&self, usr: &str) -> UsrId {
        UsrId(self.rodeo.get_or_intern(usr).into_usize() as u32)
    }

    pub fn get(&self, usr: &str) -> Option<UsrId> {
        self.rodeo.get(usr).map(|s| UsrId(s.into_usize() as u32))
    }

    pub fn resolve(&self, id: UsrId) -> Option<&str> {
        let spur = Spur::try_from_usize(id.0 as usize)?;
        self.rodeo.try_resolve(&spur)
    }

    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }

    /// All interned (id, usr) pairs, for persistence.
    pub fn snapshot(&self) -> Vec<(u32, String)> {
        self.rodeo
            .iter()
            .map(|(spur, s)| (spur.into_usize() as u32, s.to_string()))
            .collect()
    }
}

/// Process-wide record of files whose declarations have been consumed by
/// some indexing job. The first job to reach a file claims it; later jobs
/// see the claim and skip the file's declarations, which deduplicates
/// symbols in headers pulled into many translation units.
#[derive(Default)]
pub struct SeenFiles {
    files: Mutex<HashSet<FileId>>,
}

impl SeenFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this call claimed the file.
    pub fn claim(&self, file: FileId) -> bool {
        lock(&self.files).insert(file)
    }

    pub fn contains(&self, file: FileId) -> bool {
        lock(&self.files).contains(&file)
    }

    pub fn release(&self, file: FileId) -> bool {
        lock(&self.files).remove(&file)
    }

    pub fn release_all<'a>(&self, files: impl IntoIterator<Item = &'a FileId>) {
        let mut set = lock(&self.files);
        for file in files {
            set.remove(file);
        }
    }
}
