//! Indexing core of a C/C++ source intelligence daemon.
//!
//! Source files enter through [`project::ClangProject::index`], get parsed
//! on a thread pool through the opaque [`parse::Parser`] seam, and land in
//! an in-memory symbol database that answers location, reference, symbol
//! and dependency queries. File modifications propagate through reverse
//! include dependencies and trigger debounced reparses.

pub mod cache;
pub mod config;
pub mod db;
mod diagnostics;
pub mod error;
pub mod intern;
pub mod job;
pub mod location;
pub mod logging;
pub mod model;
pub mod parse;
pub mod pool;
pub mod project;
pub mod runtime;
pub mod unit;
mod util;
pub mod watcher;

pub use error::{ClangscopeError, Result};
pub use project::{ClangProject, IndexServices};
