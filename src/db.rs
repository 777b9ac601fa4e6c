use crate::intern::UsrId;
use crate::job::IndexData;
use crate::location::{FileId, Location};
use crate::model::{CursorInfo, FixIt, SourceInformation};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

/// How a staging buffer is folded into the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeMode {
    /// Remove the unit's previous contribution first.
    pub dirty: bool,
    /// Keep the previously known include edges; set by reparse jobs whose
    /// indexing pass reported no include graph at all.
    pub keep_deps: bool,
}

impl MergeMode {
    pub const ADD: MergeMode = MergeMode {
        dirty: false,
        keep_deps: false,
    };
    pub const DIRTY: MergeMode = MergeMode {
        dirty: true,
        keep_deps: false,
    };
}

/// The per-project symbol database. A plain value; every access goes
/// through the project mutex.
#[derive(Debug, Default)]
pub struct SymbolTable {
    /// Location of each known cursor, ordered so one file's entries are a
    /// contiguous range.
    pub usrs: BTreeMap<Location, CursorInfo>,
    pub decls: HashMap<UsrId, BTreeSet<Location>>,
    pub defs: HashMap<UsrId, BTreeSet<Location>>,
    pub refs: HashMap<UsrId, BTreeSet<Location>>,
    /// Every suffix permutation of each qualified name.
    pub names: BTreeMap<String, BTreeSet<UsrId>>,
    /// Symmetric override relation between virtual methods.
    pub virtuals: HashMap<UsrId, BTreeSet<UsrId>>,
    /// Position of each `#include` hash mapped to the included file.
    pub incs: BTreeMap<Location, FileId>,
    /// Translation unit to the headers it pulls in.
    pub depends: HashMap<FileId, BTreeSet<FileId>>,
    /// Header to the translation units pulling it in.
    pub reverse_depends: HashMap<FileId, BTreeSet<FileId>>,
    pub fix_its: HashMap<PathBuf, BTreeSet<FixIt>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set-unions a job's staging buffer into the database. The caller has
    /// already run `dirty` when the merge mode asked for it.
    pub fn merge(&mut self, data: &IndexData) {
        self.incs.extend(data.incs.iter().map(|(l, f)| (*l, *f)));
        self.usrs.extend(data.usrs.iter().map(|(l, c)| (*l, *c)));
        for (path, fixes) in &data.fix_its {
            self.fix_its
                .entry(path.clone())
                .or_default()
                .extend(fixes.iter().cloned());
        }
        for (name, usrs) in &data.names {
            self.names
                .entry(name.clone())
                .or_default()
                .extend(usrs.iter().copied());
        }
        for (src, dst) in [
            (&data.decls, &mut self.decls),
            (&data.defs, &mut self.defs),
            (&data.refs, &mut self.refs),
        ] {
            for (usr, locations) in src {
                dst.entry(*usr).or_default().extend(locations.iter().copied());
            }
        }
        for (src, dst) in [
            (&data.depends, &mut self.depends),
            (&data.reverse_depends, &mut self.reverse_depends),
        ] {
            for (file, files) in src {
                dst.entry(*file).or_default().extend(files.iter().copied());
            }
        }
        for (usr, overrides) in &data.virtuals {
            self.virtuals
                .entry(*usr)
                .or_default()
                .extend(overrides.iter().copied());
        }
    }

    /// Removes everything `file` contributed: its cursors, the per-USR
    /// locations inside it, the name entries of USRs left without any
    /// declaration, and (unless `keep_deps`) its include edges.
    pub fn dirty(&mut self, file: FileId, mode: MergeMode) {
        let start = Location::start_of(file);
        let end = Location::end_of(file);

        let stale: Vec<(Location, CursorInfo)> = self
            .usrs
            .range(start..end)
            .map(|(l, c)| (*l, *c))
            .collect();
        let mut touched: BTreeSet<UsrId> = BTreeSet::new();
        for (location, info) in stale {
            dirty_usr(&mut self.decls, info.usr, file);
            dirty_usr(&mut self.defs, info.usr, file);
            dirty_usr(&mut self.refs, info.usr, file);
            self.usrs.remove(&location);
            touched.insert(info.usr);
        }

        // names must not keep pointing at usrs whose last declaration just
        // went away
        touched.retain(|usr| {
            !self.decls.get(usr).is_some_and(|s| !s.is_empty())
                && !self.defs.get(usr).is_some_and(|s| !s.is_empty())
        });
        if !touched.is_empty() {
            self.names.retain(|_, usrs| {
                usrs.retain(|usr| !touched.contains(usr));
                !usrs.is_empty()
            });
        }

        if !mode.keep_deps {
            let stale_incs: Vec<Location> =
                self.incs.range(start..end).map(|(l, _)| *l).collect();
            for location in stale_incs {
                self.incs.remove(&location);
            }
            self.depends.remove(&file);
            self.reverse_depends.retain(|_, dependents| {
                dependents.remove(&file);
                !dependents.is_empty()
            });
        }
    }

    /// Consistency check mirroring the documented invariants. Returns a
    /// description of every violation found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (location, info) in &self.usrs {
            let held = |map: &HashMap<UsrId, BTreeSet<Location>>| {
                map.get(&info.usr).is_some_and(|s| s.contains(location))
            };
            if !held(&self.decls) && !held(&self.defs) && !held(&self.refs) {
                problems.push(format!(
                    "cursor at {location} not present in any location set of usr {}",
                    info.usr.0
                ));
            }
        }

        for (file, headers) in &self.depends {
            for header in headers {
                if !self
                    .reverse_depends
                    .get(header)
                    .is_some_and(|s| s.contains(file))
                {
                    problems.push(format!(
                        "depends {} -> {} missing reverse edge",
                        file.0, header.0
                    ));
                }
            }
        }
        for (header, dependents) in &self.reverse_depends {
            for dependent in dependents {
                if !self
                    .depends
                    .get(dependent)
                    .is_some_and(|s| s.contains(header))
                {
                    problems.push(format!(
                        "reverse edge {} -> {} missing forward edge",
                        header.0, dependent.0
                    ));
                }
            }
        }

        for (usr, others) in &self.virtuals {
            for other in others {
                if !self.virtuals.get(other).is_some_and(|s| s.contains(usr)) {
                    problems.push(format!(
                        "virtual relation {} -> {} not symmetric",
                        usr.0, other.0
                    ));
                }
            }
        }

        for (name, usrs) in &self.names {
            for usr in usrs {
                let present = self.decls.get(usr).is_some_and(|s| !s.is_empty())
                    || self.defs.get(usr).is_some_and(|s| !s.is_empty());
                if !present {
                    problems.push(format!(
                        "name {name:?} refers to usr {} with no declarations",
                        usr.0
                    ));
                }
            }
        }

        problems
    }
}

fn dirty_usr(map: &mut HashMap<UsrId, BTreeSet<Location>>, usr: UsrId, file: FileId) {
    if let Some(locations) = map.get_mut(&usr) {
        let stale: Vec<Location> = locations
            .range(Location::start_of(file)..Location::end_of(file))
            .copied()
            .collect();
        for location in stale {
            locations.remove(&location);
        }
    }
}

/// Unions the transitive closure of `file` over `deps` into `result`. The
/// seed itself is not inserted.
pub fn add_deps(
    file: FileId,
    deps: &HashMap<FileId, BTreeSet<FileId>>,
    result: &mut HashSet<FileId>,
) {
    let mut stack = vec![file];
    while let Some(current) = stack.pop() {
        if let Some(next) = deps.get(&current) {
            for dep in next {
                if result.insert(*dep) {
                    stack.push(*dep);
                }
            }
        }
    }
}

/// Snapshot of the database in its persisted shape. Ids are raw; restore
/// re-interns the string tables and remaps.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct SavedProject {
    pub files: Vec<(u32, PathBuf)>,
    pub usr_strings: Vec<(u32, String)>,
    pub symbols: Vec<(Location, CursorInfo)>,
    pub decls: Vec<(UsrId, Vec<Location>)>,
    pub defs: Vec<(UsrId, Vec<Location>)>,
    pub refs: Vec<(UsrId, Vec<Location>)>,
    pub symbol_names: Vec<(String, Vec<UsrId>)>,
    pub virtuals: Vec<(UsrId, Vec<UsrId>)>,
    pub incs: Vec<(Location, FileId)>,
    pub dependencies: Vec<(FileId, Vec<FileId>)>,
    pub fix_its: Vec<(PathBuf, Vec<FixIt>)>,
    pub sources: Vec<(FileId, SourceInformation)>,
    pub visited_files: Vec<FileId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CursorKind;

    fn loc(file: u32, line: u32, column: u32) -> Location {
        Location::new(FileId(file), line, column)
    }

    fn table_with_two_files() -> SymbolTable {
        let mut db = SymbolTable::new();
        let usr = UsrId(1);
        for (file, line) in [(1, 2), (2, 5)] {
            let l = loc(file, line, 1);
            db.usrs.insert(
                l,
                CursorInfo {
                    usr,
                    kind: CursorKind::MethodDef,
                    start: 0,
                    end: 3,
                },
            );
            db.defs.entry(usr).or_default().insert(l);
        }
        db.names.entry("foo".into()).or_default().insert(usr);
        db.depends.entry(FileId(1)).or_default().insert(FileId(2));
        db.reverse_depends
            .entry(FileId(2))
            .or_default()
            .insert(FileId(1));
        db.incs.insert(loc(1, 1, 1), FileId(2));
        db
    }

    #[test]
    fn dirty_removes_only_the_file() {
        let mut db = table_with_two_files();
        db.dirty(FileId(1), MergeMode::DIRTY);

        assert!(db.usrs.get(&loc(1, 2, 1)).is_none());
        assert!(db.usrs.get(&loc(2, 5, 1)).is_some());
        let defs = db.defs.get(&UsrId(1)).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs.iter().next().unwrap().file_id, FileId(2));
        assert!(db.incs.is_empty());
        assert!(db.depends.is_empty());
        assert!(db.reverse_depends.is_empty());
    }

    #[test]
    fn dirty_can_keep_dependency_edges() {
        let mut db = table_with_two_files();
        db.dirty(
            FileId(1),
            MergeMode {
                dirty: true,
                keep_deps: true,
            },
        );

        assert!(db.usrs.get(&loc(1, 2, 1)).is_none());
        assert_eq!(db.depends.len(), 1);
        assert_eq!(db.reverse_depends.len(), 1);
        assert_eq!(db.incs.len(), 1);
    }

    #[test]
    fn transitive_closure() {
        let mut deps: HashMap<FileId, BTreeSet<FileId>> = HashMap::new();
        deps.entry(FileId(1)).or_default().insert(FileId(2));
        deps.entry(FileId(2)).or_default().insert(FileId(3));
        deps.entry(FileId(3)).or_default().insert(FileId(1));

        let mut result = HashSet::new();
        add_deps(FileId(1), &deps, &mut result);
        assert_eq!(
            result,
            HashSet::from([FileId(1), FileId(2), FileId(3)])
        );
    }

    #[test]
    fn validate_reports_asymmetry() {
        let mut db = table_with_two_files();
        assert!(db.validate().is_empty());

        db.virtuals.entry(UsrId(1)).or_default().insert(UsrId(2));
        let problems = db.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("not symmetric"));
    }

    #[test]
    fn dirty_prunes_names_of_dead_usrs() {
        let mut db = table_with_two_files();
        db.dirty(FileId(1), MergeMode::DIRTY);
        assert!(
            db.names.contains_key("foo"),
            "usr still has a definition in the other file"
        );
        db.dirty(FileId(2), MergeMode::DIRTY);
        assert!(db.names.is_empty());
    }
}
