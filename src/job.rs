use crate::cache::UnitCache;
use crate::db::{self, MergeMode};
use crate::diagnostics::{self, XmlEntries};
use crate::intern::{SeenFiles, UsrId, UsrTable};
use crate::location::{FileId, Location, PathTable};
use crate::logging::ChannelRegistry;
use crate::model::{Build, CursorInfo, CursorKind, FixIt, SourceInformation};
use crate::parse::{
    Declaration, Diagnostic, EntityKind, EntityRef, IndexOptions, IndexSink, Parser, SourcePos,
};
use crate::pool::PoolJob;
use crate::project::ClangProject;
use crate::unit::SourceUnit;
use crate::util::{lock, now_secs, wait};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    /// A build-system driven (re)index request.
    Makefile,
    /// A reparse caused by file modification.
    Dirty,
}

/// Per-job staging buffer. Mirrors the database shape but is private to the
/// job; the indexer callbacks fill it and a locked merge folds it in when
/// the parse is done.
#[derive(Debug, Default)]
pub struct IndexData {
    pub file_id: FileId,
    pub incs: BTreeMap<Location, FileId>,
    pub depends: HashMap<FileId, BTreeSet<FileId>>,
    pub reverse_depends: HashMap<FileId, BTreeSet<FileId>>,
    pub names: BTreeMap<String, BTreeSet<UsrId>>,
    pub usrs: BTreeMap<Location, CursorInfo>,
    pub decls: HashMap<UsrId, BTreeSet<Location>>,
    pub defs: HashMap<UsrId, BTreeSet<Location>>,
    pub refs: HashMap<UsrId, BTreeSet<Location>>,
    pub virtuals: HashMap<UsrId, BTreeSet<UsrId>>,
    pub fix_its: HashMap<PathBuf, BTreeSet<FixIt>>,
    pub(crate) xml_entries: XmlEntries,
    pub has_diags: bool,
    /// Files this job saw, and whether it claimed them. A claimed file's
    /// declarations belong to this job; an unclaimed one was consumed by
    /// another job first and is skipped.
    pub local_seen: HashMap<FileId, bool>,
}

impl IndexData {
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            ..Default::default()
        }
    }

    /// Drops the collected results. Claim state and the diagnostic flag
    /// survive; a fallback parse must not re-claim files it already holds.
    pub fn clear(&mut self) {
        self.incs.clear();
        self.depends.clear();
        self.reverse_depends.clear();
        self.names.clear();
        self.usrs.clear();
        self.decls.clear();
        self.defs.clear();
        self.refs.clear();
        self.virtuals.clear();
        self.fix_its.clear();
        self.xml_entries.clear();
    }

    /// Files this job claimed in the globally-seen set.
    pub fn claimed(&self) -> Vec<FileId> {
        self.local_seen
            .iter()
            .filter(|(_, claimed)| **claimed)
            .map(|(file, _)| *file)
            .collect()
    }
}

#[derive(Debug, Default)]
pub(crate) struct JobOutcome {
    pub aborted: bool,
    pub parse_time: Option<u64>,
    pub claimed: Vec<FileId>,
}

impl JobOutcome {
    fn aborted(claimed: Vec<FileId>) -> Self {
        Self {
            aborted: true,
            parse_time: None,
            claimed,
        }
    }
}

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// One parse of one source file with one build configuration set. Runs on a
/// pool worker; owns its staging buffer for the duration and hands it to
/// the unit for merging.
pub struct ParseJob {
    id: u64,
    file_id: FileId,
    unit: Arc<SourceUnit>,
    project: Weak<ClangProject>,
    source: SourceInformation,
    job_type: JobType,
    reparse: bool,
    parser: Arc<dyn Parser>,
    cache: Arc<UnitCache>,
    paths: Arc<PathTable>,
    usrs: Arc<UsrTable>,
    seen: Arc<SeenFiles>,
    channels: Arc<ChannelRegistry>,
    ignore_printf_fixits: bool,
    bundled_include_path: Option<PathBuf>,
    stopped: Mutex<bool>,
    done: AtomicBool,
}

impl ParseJob {
    pub(crate) fn new(
        unit: Arc<SourceUnit>,
        project: &Arc<ClangProject>,
        source: SourceInformation,
        job_type: JobType,
        reparse: bool,
    ) -> Self {
        Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            file_id: unit.file_id,
            unit,
            project: Arc::downgrade(project),
            source,
            job_type,
            reparse,
            parser: project.parser.clone(),
            cache: project.cache.clone(),
            paths: project.services.paths.clone(),
            usrs: project.services.usrs.clone(),
            seen: project.services.seen.clone(),
            channels: project.services.channels.clone(),
            ignore_printf_fixits: project.options.ignore_printf_fixits,
            bundled_include_path: project.options.bundled_include_path.clone(),
            stopped: Mutex::new(false),
            done: AtomicBool::new(false),
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Requests the job to unwind; the parser observes it through
    /// `abort_query` between work chunks.
    pub fn stop(&self) {
        *lock(&self.stopped) = true;
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *lock(&self.stopped)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Blocks until the job marks itself done.
    pub fn wait(&self) {
        let mut state = lock(&self.unit.state);
        while !self.is_done() {
            state = wait(&self.unit.cond, state);
        }
    }

    fn assemble_args(&self, build: &Build) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.bundled_include_path {
            args.push(format!("-I{}", path.display()));
        }
        for define in &build.defines {
            args.push(format!("-D{define}"));
        }
        for path in &build.include_paths {
            args.push(format!("-I{}", path.display()));
        }
        for path in &build.includes {
            args.push("-include".to_string());
            args.push(path.display().to_string());
        }
        args.extend(build.args.iter().cloned());
        args
    }

    /// Paths of the source and everything it transitively includes, per the
    /// last merged state.
    fn dep_paths(&self) -> BTreeSet<PathBuf> {
        let mut files = HashSet::from([self.file_id]);
        if let Some(project) = self.project.upgrade() {
            let state = project.lock_state();
            db::add_deps(self.file_id, &state.db.depends, &mut files);
        }
        files
            .into_iter()
            .filter_map(|file| self.paths.path(file))
            .collect()
    }

    /// Emits the checkstyle envelope for this pass: the buffered entries
    /// when there were diagnostics, the all-clean stanzas when the parse
    /// succeeded silently, nothing for a silent failure.
    fn emit_checkstyle(&self, data: &IndexData, parsed_ok: bool) {
        if !self.channels.enabled(crate::logging::LogChannel::CompilationErrorXml) {
            return;
        }
        if !data.has_diags && !parsed_ok {
            return;
        }
        diagnostics::emit_checkstyle(&self.channels, &data.xml_entries, &self.dep_paths());
    }

    fn run(&self) -> JobOutcome {
        let source_file = self.source.source_file.clone();
        let mut data = IndexData::new(self.file_id);

        if self.is_stopped() {
            return JobOutcome::aborted(Vec::new());
        }

        let options = IndexOptions::default();
        let mut reparse = self.reparse;
        let mut parse_time = None;

        if reparse {
            match self.cache.get(&source_file, &[]) {
                Some(mut unit) => {
                    let ok = {
                        let mut sink = JobSink {
                            job: self,
                            data: &mut data,
                        };
                        self.parser.reindex_unit(unit.as_mut(), &options, &mut sink)
                    };
                    if !ok {
                        data.clear();
                        reparse = false;
                    } else {
                        parse_time = Some(now_secs());
                        if self.is_stopped() {
                            return JobOutcome::aborted(data.claimed());
                        }
                        let mut mode = MergeMode::DIRTY;
                        if unit.has_inclusions() && data.depends.is_empty() {
                            // the pass reported no include graph; keep the
                            // edges we already know
                            mode.keep_deps = true;
                        }
                        self.emit_checkstyle(&data, true);
                        self.unit.merge(&data, mode, true);
                        self.cache.put(source_file.clone(), Vec::new(), unit);
                    }
                }
                None => reparse = false,
            }
        }

        if !reparse {
            let builds = self.source.builds.clone();
            if builds.is_empty() {
                // nothing to parse; still balance the pending counter
                self.unit.merge(&data, MergeMode::ADD, true);
            }
            for (i, build) in builds.iter().enumerate() {
                let args = self.assemble_args(build);
                let outcome = {
                    let mut sink = JobSink {
                        job: self,
                        data: &mut data,
                    };
                    self.parser
                        .index_source_file(&source_file, &args, &options, &mut sink)
                };
                if outcome.succeeded {
                    parse_time = Some(now_secs());
                }
                if self.is_stopped() {
                    return JobOutcome::aborted(data.claimed());
                }
                self.emit_checkstyle(&data, outcome.succeeded);
                if !outcome.succeeded {
                    data.clear();
                } else if let Some(unit) = outcome.unit {
                    self.cache.put(source_file.clone(), args, unit);
                }
                let mode = if i == 0 {
                    MergeMode::DIRTY
                } else {
                    MergeMode::ADD
                };
                self.unit.merge(&data, mode, i + 1 == builds.len());
            }
        }

        tracing::debug!(
            "done parsing {} (reparse: {})",
            source_file.display(),
            reparse
        );

        // A stop landing after the checkpoints above cannot retract the
        // merged results; the finish handler promotes any parked successor
        // regardless of the aborted flag.
        JobOutcome {
            aborted: false,
            parse_time,
            claimed: data.claimed(),
        }
    }
}

impl PoolJob for ParseJob {
    fn job_id(&self) -> u64 {
        self.id
    }

    fn execute(self: Arc<Self>) {
        let outcome = self.run();
        {
            let mut state = lock(&self.unit.state);
            if let Some(time) = outcome.parse_time {
                state.indexed = time;
            }
            self.done.store(true, Ordering::SeqCst);
            self.unit.cond.notify_all();
        }
        if let Some(project) = self.project.upgrade() {
            project.on_job_finished(&self, &outcome);
        }
    }
}

/// The callback surface handed to the parser. Mutates only the staging
/// buffer; the project lock is never taken from here.
struct JobSink<'a> {
    job: &'a ParseJob,
    data: &'a mut IndexData,
}

impl JobSink<'_> {
    fn make_location(&self, pos: &SourcePos) -> Location {
        Location::new(self.job.paths.insert(&pos.path), pos.line, pos.column)
    }

    /// First-visit gate for the globally-seen set. True when this job may
    /// index declarations in `file`.
    fn visit_file(&mut self, file: FileId) -> bool {
        if let Some(&claimed) = self.data.local_seen.get(&file) {
            return claimed;
        }
        let claimed = self.job.seen.claim(file);
        self.data.local_seen.insert(file, claimed);
        claimed
    }

    fn record_reference(&mut self, entity_ref: &EntityRef) {
        if entity_ref.usr.is_empty() {
            return;
        }
        let location = self.make_location(&entity_ref.pos);
        if !location.is_valid() {
            return;
        }
        let usr = self.job.usrs.insert(&entity_ref.usr);
        self.data.usrs.insert(
            location,
            CursorInfo {
                usr,
                kind: CursorKind::Reference,
                start: entity_ref.pos.offset,
                end: entity_ref.pos.offset + entity_ref.name.len() as u32,
            },
        );
        self.data.refs.entry(usr).or_default().insert(location);
    }
}

impl IndexSink for JobSink<'_> {
    fn abort_query(&mut self) -> bool {
        self.job.is_stopped()
    }

    fn entered_main_file(&mut self, path: &Path) {
        self.data.file_id = self.job.paths.insert(path);
    }

    fn included_file(&mut self, hash_pos: &SourcePos, included: &Path) {
        let location = self.make_location(hash_pos);
        if !location.is_valid() {
            return;
        }
        let included_id = self.job.paths.insert(included);
        self.data
            .depends
            .entry(location.file_id)
            .or_default()
            .insert(included_id);
        self.data
            .reverse_depends
            .entry(included_id)
            .or_default()
            .insert(location.file_id);
        self.data.incs.insert(location, included_id);
    }

    fn index_declaration(&mut self, decl: &Declaration) {
        if decl.usr.is_empty() {
            return;
        }
        let location = self.make_location(&decl.pos);
        if !location.is_valid() {
            return;
        }

        // Typedefs bypass the gate: template typedefs are not reported as
        // template entities, so gating them would lose the only report.
        if !decl.is_template && decl.kind != EntityKind::Typedef {
            if !self.visit_file(location.file_id) {
                return;
            }
        }

        let usr = self.job.usrs.insert(&decl.usr);
        let kind = CursorKind::from_entity(decl.kind, decl.is_definition);
        self.data.usrs.insert(
            location,
            CursorInfo {
                usr,
                kind,
                start: decl.pos.offset,
                end: decl.pos.offset + decl.name.len() as u32,
            },
        );

        match decl.kind {
            EntityKind::InstanceMethod => {
                if decl.is_virtual {
                    for overridden in &decl.overridden {
                        let other = self.job.usrs.insert(overridden);
                        self.data.virtuals.entry(usr).or_default().insert(other);
                        self.data.virtuals.entry(other).or_default().insert(usr);
                    }
                }
                for type_ref in &decl.type_refs {
                    self.record_reference(type_ref);
                }
            }
            EntityKind::StaticMethod | EntityKind::Constructor | EntityKind::Function => {
                for type_ref in &decl.type_refs {
                    self.record_reference(type_ref);
                }
            }
            EntityKind::Class | EntityKind::Struct | EntityKind::Union => {
                for type_ref in &decl.type_refs {
                    self.record_reference(type_ref);
                }
            }
            _ => {}
        }

        add_name_permutations(&mut self.data.names, &decl.name, &decl.scope, usr);

        if decl.is_definition {
            self.data.defs.entry(usr).or_default().insert(location);
        } else {
            self.data.decls.entry(usr).or_default().insert(location);
        }
    }

    fn index_entity_reference(&mut self, entity_ref: &EntityRef) {
        if entity_ref.usr.is_empty() {
            return;
        }
        let location = self.make_location(&entity_ref.pos);
        if !location.is_valid() {
            return;
        }
        if !self.visit_file(location.file_id) {
            return;
        }
        self.record_reference(entity_ref);
    }

    fn diagnostics(&mut self, diagnostics: &[Diagnostic]) {
        diagnostics::process(
            self.data,
            diagnostics,
            &self.job.channels,
            self.job.ignore_printf_fixits,
        );
    }
}

/// Records every suffix permutation of a qualified name: `f`, `S::f`,
/// `N::S::f` for a declaration `f` inside `S` inside `N`.
fn add_name_permutations(
    names: &mut BTreeMap<String, BTreeSet<UsrId>>,
    name: &str,
    scope: &[String],
    usr: UsrId,
) {
    if name.is_empty() {
        return;
    }
    let mut current = String::new();
    for part in std::iter::once(name).chain(scope.iter().map(String::as_str)) {
        if part.is_empty() {
            continue;
        }
        if current.is_empty() {
            current.push_str(part);
        } else {
            current = format!("{part}::{current}");
        }
        names.entry(current.clone()).or_default().insert(usr);
    }
}
