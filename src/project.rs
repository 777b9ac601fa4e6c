use crate::cache::UnitCache;
use crate::config::{Options, FILE_FILTER_ENV};
use crate::db::{self, MergeMode, SavedProject, SymbolTable};
use crate::error::Result;
use crate::intern::{SeenFiles, UsrId, UsrTable};
use crate::job::{IndexData, JobOutcome, JobType, ParseJob};
use crate::location::{FileId, Location, PathTable};
use crate::logging::ChannelRegistry;
use crate::model::{
    Build, Connection, Cursor, CursorInfo, CursorKind, DependencyMode, Match, QueryFlags,
    SourceInformation,
};
use crate::parse::Parser;
use crate::pool::{JobPool, PoolJob};
use crate::unit::SourceUnit;
use crate::util::lock;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use xxhash_rust::xxh3::xxh3_64;

/// Version stamp of the persisted database layout.
const DATABASE_VERSION: u32 = 3;

/// Process-lifetime services shared by every project.
#[derive(Clone)]
pub struct IndexServices {
    pub paths: Arc<PathTable>,
    pub usrs: Arc<UsrTable>,
    pub seen: Arc<SeenFiles>,
    pub channels: Arc<ChannelRegistry>,
}

impl Default for IndexServices {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexServices {
    pub fn new() -> Self {
        Self {
            paths: Arc::new(PathTable::new()),
            usrs: Arc::new(UsrTable::new()),
            seen: Arc::new(SeenFiles::new()),
            channels: Arc::new(ChannelRegistry::new()),
        }
    }
}

/// Notifications from the coordinator to the runtime loop that owns the
/// timers and the watcher.
#[derive(Debug)]
pub enum ProjectEvent {
    /// A job was scheduled; pending sync/save timers must stop.
    Indexing,
    /// The job set drained; arm the sync timer (immediately for dirty
    /// jobs).
    JobsDrained { immediate: bool },
    /// A new file appeared in the dependency graph; watch its directory.
    WatchDir(PathBuf),
}

struct PendingJob {
    source: SourceInformation,
    job_type: JobType,
}

/// Reaction to a file-modified event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileModified {
    /// First modified file and it is a source: reindex right away.
    StartDirty,
    /// Arm (or re-arm) the coalescing timer.
    Debounce,
    /// Unknown file or already queued.
    Ignored,
}

pub(crate) struct ProjectState {
    pub db: SymbolTable,
    pub sources: HashMap<FileId, SourceInformation>,
    pub visited_files: HashSet<FileId>,
    pub pending_dirty_files: HashSet<FileId>,
    pub modified_files: HashSet<FileId>,
    pub watched_paths: HashSet<PathBuf>,
    units: HashMap<FileId, Arc<SourceUnit>>,
    jobs: HashMap<FileId, Arc<ParseJob>>,
    pending_reindex: HashMap<FileId, PendingJob>,
    pub pending_jobs: usize,
    /// Aborted jobs whose parked successor has not been resubmitted yet;
    /// keeps the project from looking idle in that gap.
    promoting: usize,
    pub job_counter: usize,
    pub started: Instant,
}

impl ProjectState {
    fn new() -> Self {
        Self {
            db: SymbolTable::new(),
            sources: HashMap::new(),
            visited_files: HashSet::new(),
            pending_dirty_files: HashSet::new(),
            modified_files: HashSet::new(),
            watched_paths: HashSet::new(),
            units: HashMap::new(),
            jobs: HashMap::new(),
            pending_reindex: HashMap::new(),
            pending_jobs: 0,
            promoting: 0,
            job_counter: 0,
            started: Instant::now(),
        }
    }

    fn idle(&self) -> bool {
        self.jobs.is_empty() && self.pending_jobs == 0 && self.promoting == 0
    }
}

/// The per-project coordinator: owns the database, the thread pool and the
/// unit map; schedules (re)index requests and answers queries.
pub struct ClangProject {
    path: PathBuf,
    // handed to units and jobs as their non-owning back reference
    self_ref: Weak<ClangProject>,
    pub(crate) options: Options,
    pub(crate) services: IndexServices,
    pub(crate) parser: Arc<dyn Parser>,
    pub(crate) pool: JobPool,
    pub(crate) cache: Arc<UnitCache>,
    state: Mutex<ProjectState>,
    idle: Condvar,
    events: mpsc::UnboundedSender<ProjectEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ProjectEvent>>>,
}

impl ClangProject {
    pub fn new(
        path: PathBuf,
        options: Options,
        services: IndexServices,
        parser: Arc<dyn Parser>,
    ) -> Arc<Self> {
        let (events, events_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|self_ref| {
            let pool = JobPool::new(options.thread_pool_size, options.thread_pool_stack_size);
            let cache = Arc::new(UnitCache::new(options.unit_cache_size));
            Self {
                path,
                self_ref: self_ref.clone(),
                options,
                services,
                parser,
                pool,
                cache,
                state: Mutex::new(ProjectState::new()),
                idle: Condvar::new(),
                events,
                events_rx: Mutex::new(Some(events_rx)),
            }
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ProjectState> {
        lock(&self.state)
    }

    /// Hands out the event stream for the runtime loop. Callable once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ProjectEvent>> {
        lock(&self.events_rx).take()
    }

    // ---- scheduling ----

    /// Schedules a (re)index of `info`. A request for a file with a job in
    /// flight stops that job and parks the request; the request is
    /// promoted when that job finishes, whether or not it observed the
    /// stop in time to abort.
    pub fn index(&self, info: SourceInformation, job_type: JobType) {
        if let Ok(filter) = std::env::var(FILE_FILTER_ENV) {
            if !filter.is_empty() && !info.source_file.to_string_lossy().contains(&filter) {
                tracing::debug!("{} rejected by file filter", info.source_file.display());
                return;
            }
        }
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };

        let file_id = self.services.paths.insert(&info.source_file);
        let unit = {
            let mut state = self.lock_state();
            if let Some(job) = state.jobs.get(&file_id) {
                if !job.is_done() {
                    job.stop();
                    state
                        .pending_reindex
                        .insert(file_id, PendingJob { source: info, job_type });
                    return;
                }
            }
            state.sources.insert(file_id, info.clone());
            state.pending_reindex.remove(&file_id);
            if state.idle() {
                state.started = Instant::now();
            }
            state.pending_jobs += 1;
            state.job_counter += 1;
            match state.units.entry(file_id) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => entry
                    .insert(Arc::new(SourceUnit::new(file_id, self.self_ref.clone())))
                    .clone(),
            }
        };

        let _ = self.events.send(ProjectEvent::Indexing);

        let job = SourceUnit::reindex(&unit, &this, info, job_type);
        {
            let mut state = self.lock_state();
            state.jobs.insert(file_id, job.clone());
        }
        self.pool.start(job);
    }

    /// Build-system entry point: resolves the compiler, dedups against the
    /// known builds, and schedules a Makefile-type index.
    pub fn index_file(
        &self,
        source_file: &Path,
        compiler: &Path,
        args: Vec<String>,
    ) -> bool {
        let compiler = resolve_compiler(compiler);
        let file_id = self.services.paths.insert(source_file);
        let mut info = {
            let state = self.lock_state();
            state.sources.get(&file_id).cloned()
        }
        .unwrap_or_else(|| SourceInformation::new(source_file.to_path_buf()));

        let mut added = false;
        if !info.builds.is_empty() {
            for build in &info.builds {
                if build.compiler == compiler && build.args == args {
                    tracing::debug!("{} is not dirty, ignoring", source_file.display());
                    return false;
                }
            }
            if !self.options.allow_multiple_builds {
                info.builds[0] = Build::new(compiler.clone(), args.clone());
                added = true;
            }
        }
        if !added {
            info.builds.push(Build::new(compiler, args));
        }
        self.index(info, JobType::Makefile);
        true
    }

    /// Bookkeeping for a job that was unqueued before it ever ran. The
    /// caller is about to submit its replacement, so no successor is
    /// promoted here.
    pub(crate) fn discard_job(&self, job: &ParseJob) {
        let mut state = self.lock_state();
        state.pending_jobs = state.pending_jobs.saturating_sub(1);
        let file_id = job.file_id();
        if state
            .jobs
            .get(&file_id)
            .is_some_and(|j| j.job_id() == job.job_id())
        {
            state.jobs.remove(&file_id);
        }
    }

    pub(crate) fn on_job_finished(&self, job: &ParseJob, outcome: &JobOutcome) {
        let pending = {
            let mut state = self.lock_state();
            let file_id = job.file_id();
            let current = state
                .jobs
                .get(&file_id)
                .is_some_and(|j| j.job_id() == job.job_id());

            // A request parked while this job was in flight must be
            // promoted on every exit: a stop can land after the job's last
            // abort check, in which case the job finishes unaborted with
            // the parked request still waiting.
            let pending = state.pending_reindex.remove(&file_id);

            if outcome.aborted {
                self.services.seen.release_all(outcome.claimed.iter());
                for file in &outcome.claimed {
                    state.visited_files.remove(file);
                }
                state.pending_jobs = state.pending_jobs.saturating_sub(1);
                if current {
                    state.jobs.remove(&file_id);
                }
            } else {
                if current {
                    state.jobs.remove(&file_id);
                }
                if let Some(time) = outcome.parse_time {
                    if let Some(source) = state.sources.get_mut(&file_id) {
                        source.parsed = time;
                    }
                }
                let total = state.job_counter.max(1);
                let done = total.saturating_sub(state.jobs.len());
                tracing::info!(
                    "[{:3}%] {}/{} {}",
                    done * 100 / total,
                    done,
                    total,
                    self.services
                        .paths
                        .path(file_id)
                        .unwrap_or_default()
                        .display()
                );
                if pending.is_none() && state.jobs.is_empty() {
                    let _ = self.events.send(ProjectEvent::JobsDrained {
                        immediate: job.job_type() == JobType::Dirty,
                    });
                }
            }

            if pending.is_some() {
                state.promoting += 1;
            } else if state.idle() {
                self.idle.notify_all();
            }
            pending
        };

        if let Some(pending) = pending {
            self.index(pending.source, pending.job_type);
            let mut state = self.lock_state();
            state.promoting = state.promoting.saturating_sub(1);
            if state.idle() {
                self.idle.notify_all();
            }
        }
    }

    /// Blocks until every scheduled job has finished, or the timeout
    /// passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        while !state.idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
        true
    }

    pub fn is_indexing(&self) -> bool {
        self.lock_state().pending_jobs > 0
    }

    pub fn is_indexed(&self, path: &Path) -> bool {
        let Some(file_id) = self.services.paths.file_id(path) else {
            return false;
        };
        let state = self.lock_state();
        state.visited_files.contains(&file_id) || state.sources.contains_key(&file_id)
    }

    pub fn sources(&self) -> Vec<SourceInformation> {
        let state = self.lock_state();
        state.sources.values().cloned().collect()
    }

    pub fn source_info(&self, path: &Path) -> Option<SourceInformation> {
        let file_id = self.services.paths.file_id(path)?;
        self.lock_state().sources.get(&file_id).cloned()
    }

    // ---- dirty engine ----

    /// Records a file-modified event. The caller (normally the runtime
    /// loop) acts on the returned disposition.
    pub fn on_file_modified(&self, path: &Path) -> FileModified {
        let Some(file_id) = self.services.paths.file_id(path) else {
            return FileModified::Ignored;
        };
        let mut state = self.lock_state();
        if !state.modified_files.insert(file_id) {
            return FileModified::Ignored;
        }
        tracing::debug!("{} was modified", path.display());
        if state.modified_files.len() == 1 && is_source_file(path) {
            FileModified::StartDirty
        } else {
            FileModified::Debounce
        }
    }

    /// Reissues parse jobs for every modified file and everything that
    /// depends on one. Files with no build information get a pure
    /// symbol-dirty pass instead.
    pub fn start_dirty_jobs(&self) {
        let to_index: Vec<SourceInformation> = {
            let mut state = self.lock_state();
            let seeds = std::mem::take(&mut state.modified_files);
            if seeds.is_empty() {
                return;
            }
            let mut dirty: HashSet<FileId> = seeds.iter().copied().collect();
            for seed in &seeds {
                db::add_deps(*seed, &state.db.reverse_depends, &mut dirty);
            }
            for file in &dirty {
                state.visited_files.remove(file);
            }
            state.pending_dirty_files.extend(dirty.iter().copied());
            dirty
                .iter()
                .filter_map(|file| state.sources.get(file).cloned())
                .collect()
        };

        if to_index.is_empty() {
            let files = {
                let mut state = self.lock_state();
                let files = std::mem::take(&mut state.pending_dirty_files);
                for file in &files {
                    state.db.dirty(*file, MergeMode::DIRTY);
                }
                files
            };
            self.services.seen.release_all(files.iter());
            return;
        }

        for info in to_index {
            self.index(info, JobType::Dirty);
        }
    }

    /// Marks every indexed translation unit matching `pattern` modified
    /// and kicks the dirty engine. Returns how many were marked.
    pub fn reindex(&self, pattern: &Match) -> usize {
        let count = {
            let mut state = self.lock_state();
            let dirty: Vec<FileId> = state
                .db
                .depends
                .keys()
                .copied()
                .filter(|file| {
                    self.services
                        .paths
                        .path(*file)
                        .is_some_and(|p| pattern.matches(&p))
                })
                .collect();
            state.modified_files.extend(dirty.iter().copied());
            dirty.len()
        };
        if count > 0 {
            self.start_dirty_jobs();
        }
        count
    }

    /// Removes every source entry matching `pattern`, stopping in-flight
    /// jobs for them. Returns how many entries were removed.
    pub fn remove(&self, pattern: &Match) -> usize {
        let mut state = self.lock_state();
        let doomed: Vec<FileId> = state
            .sources
            .iter()
            .filter(|(_, info)| pattern.matches(&info.source_file))
            .map(|(file, _)| *file)
            .collect();
        for file in &doomed {
            state.sources.remove(file);
            state.pending_reindex.remove(file);
            if let Some(job) = state.jobs.get(file) {
                job.stop();
            }
        }
        doomed.len()
    }

    // ---- queries ----

    /// Resolves `location` to the cursor covering it: the greatest stored
    /// location not past it, on the same line, whose symbol span still
    /// reaches it.
    fn resolve_cursor(state: &ProjectState, location: Location) -> Option<(Location, CursorInfo)> {
        let (found, info) = state.db.usrs.range(..=location).next_back()?;
        if found.file_id != location.file_id {
            return None;
        }
        if *found != location
            && (found.line != location.line || location.column >= found.column + info.len())
        {
            return None;
        }
        Some((*found, *info))
    }

    fn first_location(
        map: &HashMap<UsrId, BTreeSet<Location>>,
        usr: UsrId,
    ) -> Option<Location> {
        map.get(&usr).and_then(|set| set.iter().next().copied())
    }

    /// What is at `location`? Empty cursor on miss.
    pub fn cursor(&self, location: Location) -> Cursor {
        let state = self.lock_state();
        let Some((found, info)) = Self::resolve_cursor(&state, location) else {
            return Cursor::default();
        };

        let target = if info.kind == CursorKind::Reference {
            Self::first_location(&state.db.defs, info.usr)
                .or_else(|| Self::first_location(&state.db.decls, info.usr))
        } else if info.kind.is_definition() {
            Self::first_location(&state.db.decls, info.usr)
        } else {
            Self::first_location(&state.db.defs, info.usr)
        };

        Cursor {
            location: found,
            kind: Some(info.kind),
            symbol_name: String::new(),
            target,
            start: info.start,
            end: info.end,
        }
    }

    fn location_passes(&self, location: Location, path_filter: &[PathBuf]) -> bool {
        if path_filter.is_empty() {
            return true;
        }
        let Some(path) = self.services.paths.path(location.file_id) else {
            return false;
        };
        path_filter.iter().any(|filter| path.starts_with(filter))
    }

    fn write_locations(
        &self,
        locations: Option<&BTreeSet<Location>>,
        path_filter: &[PathBuf],
        conn: &mut dyn Connection,
    ) {
        let Some(locations) = locations else { return };
        for location in locations {
            if !self.location_passes(*location, path_filter) {
                continue;
            }
            if let Some(path) = self.services.paths.path(location.file_id) {
                conn.write(&format!(
                    "{}:{}:{} r\t",
                    path.display(),
                    location.line,
                    location.column
                ));
            }
        }
    }

    /// Streams reference lines for the symbol at `location`, terminated by
    /// a backtick.
    pub fn references(
        &self,
        location: Location,
        flags: QueryFlags,
        path_filter: &[PathBuf],
        conn: &mut dyn Connection,
    ) {
        let state = self.lock_state();
        let Some((_, info)) = Self::resolve_cursor(&state, location) else {
            conn.write("`");
            return;
        };
        let target = info.usr;

        let write_refs = |conn: &mut dyn Connection, usr: UsrId| {
            self.write_locations(state.db.refs.get(&usr), path_filter, conn);
        };
        let write_decls = |conn: &mut dyn Connection, usr: UsrId| {
            self.write_locations(state.db.decls.get(&usr), path_filter, conn);
            self.write_locations(state.db.defs.get(&usr), path_filter, conn);
        };

        if flags.all_references || !flags.find_virtuals {
            write_refs(conn, target);
        }
        if flags.all_references || flags.find_virtuals {
            write_decls(conn, target);
        }
        if flags.find_virtuals {
            if let Some(siblings) = state.db.virtuals.get(&target) {
                for sibling in siblings {
                    if flags.all_references {
                        write_refs(conn, *sibling);
                    }
                    write_decls(conn, *sibling);
                }
            }
        }
        conn.write("`");
    }

    /// Every known symbol name starting with `prefix`.
    pub fn list_symbols(&self, prefix: &str, path_filter: &[PathBuf]) -> BTreeSet<String> {
        let state = self.lock_state();
        let mut result = BTreeSet::new();
        for (name, usrs) in state.db.names.range(prefix.to_string()..) {
            if !name.starts_with(prefix) {
                break;
            }
            let passes = path_filter.is_empty()
                || usrs.iter().any(|usr| {
                    [&state.db.decls, &state.db.defs].into_iter().any(|map| {
                        map.get(usr).is_some_and(|locations| {
                            locations
                                .iter()
                                .any(|l| self.location_passes(*l, path_filter))
                        })
                    })
                });
            if passes {
                result.insert(name.clone());
            }
        }
        result
    }

    /// Every declaration and definition cursor registered under `name`.
    pub fn find_cursors(&self, name: &str, path_filter: &[PathBuf]) -> BTreeSet<Cursor> {
        let state = self.lock_state();
        let Some(usrs) = state.db.names.get(name) else {
            return BTreeSet::new();
        };

        let mut cursors = BTreeSet::new();
        for usr in usrs {
            for (map, other) in [
                (&state.db.decls, &state.db.defs),
                (&state.db.defs, &state.db.decls),
            ] {
                let Some(locations) = map.get(usr) else { continue };
                for location in locations {
                    if !self.location_passes(*location, path_filter) {
                        continue;
                    }
                    let Some(info) = state.db.usrs.get(location) else {
                        continue;
                    };
                    cursors.insert(Cursor {
                        location: *location,
                        kind: Some(info.kind),
                        symbol_name: name.to_string(),
                        target: Self::first_location(other, *usr),
                        start: info.start,
                        end: info.end,
                    });
                }
            }
        }
        cursors
    }

    /// Transitive dependency closure of `path`, including the query
    /// itself.
    pub fn dependencies(&self, path: &Path, mode: DependencyMode) -> BTreeSet<PathBuf> {
        let mut result = BTreeSet::from([path.to_path_buf()]);
        let Some(file_id) = self.services.paths.file_id(path) else {
            return result;
        };
        let state = self.lock_state();
        let mut files = HashSet::new();
        match mode {
            DependencyMode::ArgDependsOn => {
                db::add_deps(file_id, &state.db.depends, &mut files)
            }
            DependencyMode::DependsOnArg => {
                db::add_deps(file_id, &state.db.reverse_depends, &mut files)
            }
        }
        result.extend(files.into_iter().filter_map(|f| self.services.paths.path(f)));
        result
    }

    /// Fix-it lines for `path`, newest first, formatted `start-end text`.
    pub fn fixits(&self, path: &Path) -> String {
        let state = self.lock_state();
        let mut out = String::new();
        if let Some(fixes) = state.db.fix_its.get(path) {
            for fix in fixes.iter().rev() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("{}-{} {}", fix.start, fix.end, fix.text));
            }
        }
        out
    }

    /// Runs the database consistency check.
    pub fn validate(&self) -> Vec<String> {
        self.lock_state().db.validate()
    }

    // ---- sync & persistence ----

    /// End-of-batch bookkeeping, run by the runtime loop when the sync
    /// timer fires.
    pub fn sync(&self) {
        let issues = {
            let mut state = self.lock_state();
            tracing::info!(
                "jobs took {:.2} secs",
                state.started.elapsed().as_secs_f64()
            );
            state.job_counter = 0;
            if self.options.validate {
                state.db.validate()
            } else {
                Vec::new()
            }
        };
        for issue in &issues {
            tracing::error!("validate: {issue}");
        }
    }

    fn data_file_path(&self) -> PathBuf {
        let canonical = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        let hash = xxh3_64(canonical.to_string_lossy().as_bytes());
        self.options.data_dir.join(format!("{hash:016x}.db"))
    }

    /// Persists the project: `[u32 version][u32 total size]` followed by
    /// the encoded payload, written atomically.
    pub fn save(&self) -> Result<()> {
        let started = Instant::now();
        let saved = {
            let state = self.lock_state();
            self.to_saved(&state)
        };
        let payload = rmp_serde::to_vec(&saved)?;

        let path = self.data_file_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let total = (payload.len() + 8) as u32;
        let mut bytes = Vec::with_capacity(payload.len() + 8);
        bytes.extend_from_slice(&DATABASE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&total.to_le_bytes());
        bytes.extend_from_slice(&payload);

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &path)?;

        tracing::info!(
            "saved project {} in {} ms",
            self.path.display(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    fn to_saved(&self, state: &ProjectState) -> SavedProject {
        fn sets<K: Copy, V: Copy>(map: &HashMap<K, BTreeSet<V>>) -> Vec<(K, Vec<V>)> {
            map.iter()
                .map(|(k, set)| (*k, set.iter().copied().collect()))
                .collect()
        }

        SavedProject {
            files: self.services.paths.snapshot(),
            usr_strings: self.services.usrs.snapshot(),
            symbols: state.db.usrs.iter().map(|(l, c)| (*l, *c)).collect(),
            decls: sets(&state.db.decls),
            defs: sets(&state.db.defs),
            refs: sets(&state.db.refs),
            symbol_names: state
                .db
                .names
                .iter()
                .map(|(name, usrs)| (name.clone(), usrs.iter().copied().collect()))
                .collect(),
            virtuals: sets(&state.db.virtuals),
            incs: state.db.incs.iter().map(|(l, f)| (*l, *f)).collect(),
            dependencies: sets(&state.db.depends),
            fix_its: state
                .db
                .fix_its
                .iter()
                .map(|(path, fixes)| (path.clone(), fixes.iter().cloned().collect()))
                .collect(),
            sources: state
                .sources
                .iter()
                .map(|(file, info)| (*file, info.clone()))
                .collect(),
            visited_files: state.visited_files.iter().copied().collect(),
        }
    }

    /// Restores the persisted database, re-interning paths and USR strings
    /// so the ids are valid in this process. Version or size mismatch
    /// deletes the file and starts empty; vanished or stale sources are
    /// queued as modified.
    pub fn restore(&self) -> Result<bool> {
        let started = Instant::now();
        let path = self.data_file_path();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(false),
        };

        let header_ok = bytes.len() >= 8
            && u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == DATABASE_VERSION
            && u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize
                == bytes.len();
        if !header_ok {
            tracing::error!("{} is corrupt or stale, removing", path.display());
            let _ = std::fs::remove_file(&path);
            return Ok(false);
        }

        let saved: SavedProject = match rmp_serde::from_slice(&bytes[8..]) {
            Ok(saved) => saved,
            Err(err) => {
                tracing::error!("{} failed to decode ({err}), removing", path.display());
                let _ = std::fs::remove_file(&path);
                return Ok(false);
            }
        };

        let file_map: HashMap<u32, FileId> = saved
            .files
            .iter()
            .map(|(old, p)| (*old, self.services.paths.insert(p)))
            .collect();
        let usr_map: HashMap<u32, UsrId> = saved
            .usr_strings
            .iter()
            .map(|(old, usr)| (*old, self.services.usrs.insert(usr)))
            .collect();
        let map_file = |file: FileId| file_map.get(&file.0).copied().unwrap_or(FileId::NONE);
        let map_loc =
            |location: Location| Location::new(map_file(location.file_id), location.line, location.column);
        let map_usr = |usr: UsrId| usr_map.get(&usr.0).copied().unwrap_or_default();

        let mut db = SymbolTable::new();
        for (location, info) in &saved.symbols {
            db.usrs.insert(
                map_loc(*location),
                CursorInfo {
                    usr: map_usr(info.usr),
                    ..*info
                },
            );
        }
        for (src, dst) in [
            (&saved.decls, &mut db.decls),
            (&saved.defs, &mut db.defs),
            (&saved.refs, &mut db.refs),
        ] {
            for (usr, locations) in src {
                dst.entry(map_usr(*usr))
                    .or_default()
                    .extend(locations.iter().map(|l| map_loc(*l)));
            }
        }
        for (name, usrs) in &saved.symbol_names {
            db.names
                .entry(name.clone())
                .or_default()
                .extend(usrs.iter().map(|u| map_usr(*u)));
        }
        for (usr, others) in &saved.virtuals {
            db.virtuals
                .entry(map_usr(*usr))
                .or_default()
                .extend(others.iter().map(|u| map_usr(*u)));
        }
        for (location, file) in &saved.incs {
            db.incs.insert(map_loc(*location), map_file(*file));
        }
        for (file, headers) in &saved.dependencies {
            let file = map_file(*file);
            let headers: BTreeSet<FileId> = headers.iter().map(|h| map_file(*h)).collect();
            for header in &headers {
                db.reverse_depends.entry(*header).or_default().insert(file);
            }
            db.depends.entry(file).or_default().extend(headers);
        }
        for (path, fixes) in &saved.fix_its {
            db.fix_its
                .entry(path.clone())
                .or_default()
                .extend(fixes.iter().cloned());
        }

        let mut sources: HashMap<FileId, SourceInformation> = HashMap::new();
        let mut modified: HashSet<FileId> = HashSet::new();
        for (file, info) in &saved.sources {
            let file = map_file(*file);
            if !info.source_file.is_file() {
                tracing::error!("{} seems to have disappeared", info.source_file.display());
                modified.insert(file);
                continue;
            }
            let mut deps = HashSet::from([file]);
            db::add_deps(file, &db.depends, &mut deps);
            let stale = deps.iter().any(|dep| {
                self.services
                    .paths
                    .path(*dep)
                    .is_some_and(|p| file_mtime(&p) > info.parsed)
            });
            if stale {
                modified.insert(file);
            }
            sources.insert(file, info.clone());
        }

        let visited: HashSet<FileId> =
            saved.visited_files.iter().map(|f| map_file(*f)).collect();
        for file in &visited {
            self.services.seen.claim(*file);
        }

        let mut watched: HashSet<PathBuf> = HashSet::new();
        for file in db
            .depends
            .keys()
            .chain(db.depends.values().flatten())
            .chain(sources.keys())
        {
            let Some(file_path) = self.services.paths.path(*file) else {
                continue;
            };
            let Some(dir) = file_path.parent() else { continue };
            if !self.options.watch_system_paths && is_system_path(dir) {
                continue;
            }
            if watched.insert(dir.to_path_buf()) {
                let _ = self.events.send(ProjectEvent::WatchDir(dir.to_path_buf()));
            }
        }

        {
            let mut state = self.lock_state();
            state.db = db;
            state.sources = sources;
            state.visited_files = visited;
            state.watched_paths = watched;
            state.modified_files.extend(modified.iter().copied());
        }

        tracing::info!(
            "restored project {} in {} ms",
            self.path.display(),
            started.elapsed().as_millis()
        );

        if !modified.is_empty() {
            self.start_dirty_jobs();
        }
        Ok(true)
    }

    /// Registers directory watches for files newly seen in a merge.
    pub(crate) fn watch_new_files(&self, state: &mut ProjectState, data: &IndexData) {
        let files: HashSet<FileId> = std::iter::once(data.file_id)
            .chain(data.depends.keys().copied())
            .chain(data.depends.values().flatten().copied())
            .collect();
        for file in files {
            let Some(path) = self.services.paths.path(file) else {
                continue;
            };
            let Some(dir) = path.parent() else { continue };
            if !self.options.watch_system_paths && is_system_path(dir) {
                continue;
            }
            if state.watched_paths.insert(dir.to_path_buf()) {
                let _ = self.events.send(ProjectEvent::WatchDir(dir.to_path_buf()));
            }
        }
    }
}

fn file_mtime(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

pub(crate) fn is_source_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("c" | "cc" | "cpp" | "cxx" | "m" | "mm")
    )
}

fn is_system_path(path: &Path) -> bool {
    (path.starts_with("/usr") && !path.starts_with("/usr/home"))
        || path.starts_with("/opt")
        || path.starts_with("/System")
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

const WRAPPER_NAMES: [&str; 2] = ["gcc-rtags-wrapper.sh", "icecc"];

/// Resolves a compiler path, skipping over build wrappers: when the
/// configured compiler is a wrapper link, the real compiler is the next
/// executable of the same name further along `PATH` that is not itself a
/// wrapper.
pub fn resolve_compiler(compiler: &Path) -> PathBuf {
    let Some(file_name) = compiler.file_name().map(|n| n.to_os_string()) else {
        return compiler.to_path_buf();
    };
    let link_name = std::fs::read_link(compiler)
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_os_string()))
        .unwrap_or_else(|| file_name.clone());

    if WRAPPER_NAMES.iter().any(|w| link_name == *w) {
        let search_path = std::env::var_os("PATH").unwrap_or_default();
        let mut passed_wrapper = false;
        for dir in std::env::split_paths(&search_path) {
            let candidate = dir.join(&file_name);
            if !is_executable(&candidate) {
                continue;
            }
            if candidate == compiler {
                passed_wrapper = true;
                continue;
            }
            if passed_wrapper {
                let resolved = std::fs::canonicalize(&candidate).unwrap_or(candidate);
                let still_wrapper = resolved
                    .file_name()
                    .is_some_and(|n| WRAPPER_NAMES.iter().any(|w| n == *w));
                if !still_wrapper {
                    return resolved;
                }
            }
        }
    }

    std::fs::canonicalize(compiler).unwrap_or_else(|_| compiler.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_file_detection() {
        assert!(is_source_file(Path::new("/x/a.cpp")));
        assert!(is_source_file(Path::new("/x/a.c")));
        assert!(!is_source_file(Path::new("/x/a.h")));
        assert!(!is_source_file(Path::new("/x/a")));
    }

    #[test]
    fn system_path_detection() {
        assert!(is_system_path(Path::new("/usr/include")));
        assert!(is_system_path(Path::new("/opt/local/include")));
        assert!(!is_system_path(Path::new("/usr/home/me/src")));
        assert!(!is_system_path(Path::new("/home/me/src")));
    }

    #[test]
    fn plain_compilers_resolve_to_themselves() {
        let dir = tempfile::tempdir().unwrap();
        let cc = dir.path().join("cc");
        std::fs::write(&cc, "#!/bin/sh\n").unwrap();
        let resolved = resolve_compiler(&cc);
        assert_eq!(resolved, std::fs::canonicalize(&cc).unwrap());
    }
}
