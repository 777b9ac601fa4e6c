//! The parser seam.
//!
//! The indexing core never links the parser directly; it drives an
//! implementation of [`Parser`] and receives entities through the
//! [`IndexSink`] callback surface, mirroring libclang's
//! `clang_indexSourceFile` contract. The production backend adapts the
//! libclang indexer callbacks onto these types; tests script them.
//!
//! Sink implementations mutate only their own staging state. Backends must
//! poll [`IndexSink::abort_query`] between work chunks and unwind promptly
//! when it returns true.

use std::any::Any;
use std::path::{Path, PathBuf};

/// Entity kinds as reported by the parser, pre-mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Class,
    Struct,
    Union,
    Enum,
    EnumConstant,
    Namespace,
    Field,
    Variable,
    StaticVariable,
    Function,
    InstanceMethod,
    StaticMethod,
    Constructor,
    Destructor,
    Typedef,
    Unexposed,
}

/// A spelled position inside a file, with the byte offset of the spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
    pub offset: u32,
}

/// A reference from one location to a named entity.
#[derive(Debug, Clone)]
pub struct EntityRef {
    pub usr: String,
    pub name: String,
    pub pos: SourcePos,
}

/// A declaration or definition reported by the indexer pass.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub usr: String,
    pub name: String,
    pub kind: EntityKind,
    pub is_definition: bool,
    /// Template entities (and their specializations) bypass the
    /// seen-file deduplication gate.
    pub is_template: bool,
    pub pos: SourcePos,
    /// Semantic parent names, innermost first. `N::S::f` has
    /// `name == "f"` and `scope == ["S", "N"]`.
    pub scope: Vec<String>,
    pub is_virtual: bool,
    /// USRs of the methods this one overrides.
    pub overridden: Vec<String>,
    /// `TypeRef` children found under the declaration: member types for
    /// records, parameter types for functions. The sink decides per kind
    /// whether to record them.
    pub type_refs: Vec<EntityRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    Ignored,
    Note,
    Warning,
    Error,
    Fatal,
}

/// A highlighted range: spelled start plus the end byte offset.
#[derive(Debug, Clone)]
pub struct DiagnosticRange {
    pub start: SourcePos,
    pub end_offset: u32,
}

#[derive(Debug, Clone)]
pub struct FixItHint {
    pub range: DiagnosticRange,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
    pub pos: Option<SourcePos>,
    pub ranges: Vec<DiagnosticRange>,
    pub fix_its: Vec<FixItHint>,
}

/// Indexing options passed to every parse.
#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    pub function_local_symbols: bool,
    pub implicit_template_instantiations: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            function_local_symbols: true,
            implicit_template_instantiations: true,
        }
    }
}

/// Callback surface a parse job exposes to the backend. All methods mutate
/// only the job's staging buffer.
pub trait IndexSink {
    /// Polled by the backend between chunks; true requests unwinding.
    fn abort_query(&mut self) -> bool;
    fn entered_main_file(&mut self, path: &Path);
    /// `hash_pos` is the position of the `#include` hash; `included` the
    /// resolved target file.
    fn included_file(&mut self, hash_pos: &SourcePos, included: &Path);
    fn index_declaration(&mut self, decl: &Declaration);
    fn index_entity_reference(&mut self, entity_ref: &EntityRef);
    /// Called once per pass with the complete diagnostic set.
    fn diagnostics(&mut self, diagnostics: &[Diagnostic]);
}

/// An opaque parsed translation unit, owned by exactly one holder at a
/// time. Dropping it releases the backend's resources.
pub trait ParsedUnit: Send {
    fn as_any(&mut self) -> &mut dyn Any;
    /// Whether the unit contains any inclusion directives at all; used to
    /// distinguish "no includes" from "reparse reported nothing".
    fn has_inclusions(&self) -> bool;
}

/// Result of a fresh parse. A failed parse may still have produced
/// diagnostics through the sink.
pub struct ParseOutcome {
    pub succeeded: bool,
    pub unit: Option<Box<dyn ParsedUnit>>,
}

impl ParseOutcome {
    pub fn failed() -> Self {
        Self {
            succeeded: false,
            unit: None,
        }
    }
}

/// The opaque parser. Calls block for the duration of the compilation and
/// are driven from pool worker threads.
pub trait Parser: Send + Sync {
    /// Parse `source` with `args` and run the indexing pass against `sink`.
    fn index_source_file(
        &self,
        source: &Path,
        args: &[String],
        options: &IndexOptions,
        sink: &mut dyn IndexSink,
    ) -> ParseOutcome;

    /// Reparse a cached unit in place and run the indexing pass. Returns
    /// false when the reparse failed and the caller should fall back to a
    /// fresh parse.
    fn reindex_unit(
        &self,
        unit: &mut dyn ParsedUnit,
        options: &IndexOptions,
        sink: &mut dyn IndexSink,
    ) -> bool;
}
