use crate::parse::ParsedUnit;
use crate::util::lock;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

struct CachedUnit {
    path: PathBuf,
    args: Vec<String>,
    unit: Box<dyn ParsedUnit>,
}

/// Bounded FIFO of recently parsed translation units.
///
/// `get` removes and returns, transferring ownership to the caller; `put`
/// appends and evicts the oldest entry past the bound. The backend handle
/// inside an evicted entry is released by drop, exactly once.
pub struct UnitCache {
    limit: usize,
    units: Mutex<VecDeque<CachedUnit>>,
}

pub const DEFAULT_UNIT_CACHE_SIZE: usize = 5;

impl UnitCache {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            units: Mutex::new(VecDeque::new()),
        }
    }

    /// Removes and returns the cached unit for `path`. An empty `args`
    /// matches any build; otherwise the stored arguments must agree.
    pub fn get(&self, path: &Path, args: &[String]) -> Option<Box<dyn ParsedUnit>> {
        let mut units = lock(&self.units);
        let pos = units
            .iter()
            .position(|u| u.path == path && (args.is_empty() || u.args == args))?;
        units.remove(pos).map(|u| u.unit)
    }

    pub fn put(&self, path: PathBuf, args: Vec<String>, unit: Box<dyn ParsedUnit>) {
        let mut units = lock(&self.units);
        units.push_back(CachedUnit { path, args, unit });
        while units.len() > self.limit {
            units.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.units).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.units).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.units).clear();
    }
}
