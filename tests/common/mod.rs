#![allow(dead_code)]

use clangscope::config::Options;
use clangscope::model::{Build, SourceInformation};
use clangscope::parse::{
    Declaration, Diagnostic, EntityKind, EntityRef, IndexOptions, IndexSink, ParseOutcome,
    ParsedUnit, Parser, SourcePos,
};
use clangscope::project::{ClangProject, IndexServices};
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// What one translation unit reports when parsed: include edges (position
/// of the hash plus the included file), declarations, references and
/// diagnostics.
#[derive(Default, Clone)]
pub struct UnitScript {
    pub includes: Vec<(PathBuf, u32, PathBuf)>,
    pub decls: Vec<Declaration>,
    pub refs: Vec<EntityRef>,
    pub diags: Vec<Diagnostic>,
}

pub struct ScriptedUnit {
    path: PathBuf,
    has_inclusions: bool,
}

impl ParsedUnit for ScriptedUnit {
    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
    fn has_inclusions(&self) -> bool {
        self.has_inclusions
    }
}

#[derive(Default)]
struct GateState {
    started: bool,
    released: bool,
}

/// Blocks one parse until released, so tests can interleave requests with
/// a running job.
#[derive(Default)]
pub struct ParseGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ParseGate {
    pub fn wait_started(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.started {
            state = self.cond.wait(state).unwrap();
        }
    }

    pub fn release(&self) {
        self.state.lock().unwrap().released = true;
        self.cond.notify_all();
    }

    fn enter(&self) {
        self.state.lock().unwrap().started = true;
        self.cond.notify_all();
    }

    fn released(&self) -> bool {
        self.state.lock().unwrap().released
    }
}

/// Parser backend whose output is scripted per source file.
#[derive(Default)]
pub struct ScriptedParser {
    scripts: Mutex<HashMap<PathBuf, UnitScript>>,
    gate: Mutex<Option<Arc<ParseGate>>>,
    pub parses: AtomicUsize,
    pub reparses: AtomicUsize,
}

impl ScriptedParser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs (or replaces) the script for `path`.
    pub fn script(&self, path: &Path, script: UnitScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), script);
    }

    /// Gates the next fresh parse; it blocks until the gate is released or
    /// the job is aborted.
    pub fn gate_next(&self) -> Arc<ParseGate> {
        let gate = Arc::new(ParseGate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn replay(&self, path: &Path, sink: &mut dyn IndexSink) -> bool {
        let scripts = self.scripts.lock().unwrap();
        let Some(script) = scripts.get(path) else {
            return false;
        };
        sink.entered_main_file(path);
        for (in_file, line, included) in &script.includes {
            sink.included_file(
                &SourcePos {
                    path: in_file.clone(),
                    line: *line,
                    column: 1,
                    offset: 0,
                },
                included,
            );
        }
        for decl in &script.decls {
            sink.index_declaration(decl);
        }
        for entity_ref in &script.refs {
            sink.index_entity_reference(entity_ref);
        }
        if !script.diags.is_empty() {
            sink.diagnostics(&script.diags);
        }
        true
    }
}

impl Parser for ScriptedParser {
    fn index_source_file(
        &self,
        source: &Path,
        _args: &[String],
        _options: &IndexOptions,
        sink: &mut dyn IndexSink,
    ) -> ParseOutcome {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.enter();
            loop {
                if sink.abort_query() {
                    return ParseOutcome::failed();
                }
                if gate.released() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        if !self.replay(source, sink) {
            return ParseOutcome::failed();
        }
        self.parses.fetch_add(1, Ordering::SeqCst);
        let has_inclusions = self
            .scripts
            .lock()
            .unwrap()
            .get(source)
            .map(|s| !s.includes.is_empty())
            .unwrap_or(false);
        ParseOutcome {
            succeeded: true,
            unit: Some(Box::new(ScriptedUnit {
                path: source.to_path_buf(),
                has_inclusions,
            })),
        }
    }

    fn reindex_unit(
        &self,
        unit: &mut dyn ParsedUnit,
        _options: &IndexOptions,
        sink: &mut dyn IndexSink,
    ) -> bool {
        let Some(scripted) = unit.as_any().downcast_mut::<ScriptedUnit>() else {
            return false;
        };
        let path = scripted.path.clone();
        if self.replay(&path, sink) {
            self.reparses.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

pub fn pos(path: &Path, line: u32, column: u32, offset: u32) -> SourcePos {
    SourcePos {
        path: path.to_path_buf(),
        line,
        column,
        offset,
    }
}

pub fn decl(
    usr: &str,
    name: &str,
    kind: EntityKind,
    is_definition: bool,
    at: SourcePos,
) -> Declaration {
    Declaration {
        usr: usr.to_string(),
        name: name.to_string(),
        kind,
        is_definition,
        is_template: false,
        pos: at,
        scope: Vec::new(),
        is_virtual: false,
        overridden: Vec::new(),
        type_refs: Vec::new(),
    }
}

pub fn scoped(mut declaration: Declaration, scope: &[&str]) -> Declaration {
    declaration.scope = scope.iter().map(|s| s.to_string()).collect();
    declaration
}

pub fn entity_ref(usr: &str, name: &str, at: SourcePos) -> EntityRef {
    EntityRef {
        usr: usr.to_string(),
        name: name.to_string(),
        pos: at,
    }
}

pub fn source_info(path: &Path) -> SourceInformation {
    let mut info = SourceInformation::new(path.to_path_buf());
    info.builds
        .push(Build::new(PathBuf::from("/usr/bin/c++"), Vec::new()));
    info
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub services: IndexServices,
    pub parser: Arc<ScriptedParser>,
    pub project: Arc<ClangProject>,
}

pub fn fixture() -> Fixture {
    fixture_with(Options::default())
}

pub fn fixture_with(mut options: Options) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    options.thread_pool_size = 2;
    options.data_dir = dir.path().join("data");
    let services = IndexServices::new();
    let parser = ScriptedParser::new();
    let project = ClangProject::new(
        dir.path().to_path_buf(),
        options,
        services.clone(),
        parser.clone(),
    );
    Fixture {
        dir,
        services,
        parser,
        project,
    }
}

impl Fixture {
    /// Creates a file under the project root and returns its canonical
    /// path.
    pub fn file(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, "// fixture\n").unwrap();
        std::fs::canonicalize(&path).unwrap()
    }

    pub fn index(&self, path: &Path) {
        self.project
            .index(source_info(path), clangscope::job::JobType::Makefile);
    }

    pub fn wait(&self) {
        assert!(
            self.project.wait_idle(Duration::from_secs(10)),
            "project did not go idle"
        );
    }
}
