use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the text log: daily-rolling file under `~/.clangscope/logs`
/// plus stderr when running interactively.
///
/// LSP-style hosts that own stdio should pass `stderr: false` so protocol
/// traffic stays clean.
pub fn init_logging(component: &str, stderr: bool) -> WorkerGuard {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let log_dir = Path::new(&home).join(".clangscope/logs");
    let _ = std::fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, component);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    if stderr {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();
    }

    guard
}

/// Structured output channels, separate from the leveled text log.
///
/// `CompilationError` carries the human-readable diagnostic lines;
/// `CompilationErrorXml` carries one checkstyle document per indexing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogChannel {
    CompilationError,
    CompilationErrorXml,
}

/// Receiver end of a structured channel. The daemon registers one per
/// connected client; a channel with no sinks is disabled and producers skip
/// the formatting work entirely.
pub trait ChannelSink: Send + Sync {
    fn write(&self, message: &str);
}

#[derive(Default)]
pub struct ChannelRegistry {
    sinks: RwLock<HashMap<LogChannel, Vec<Arc<dyn ChannelSink>>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: LogChannel, sink: Arc<dyn ChannelSink>) {
        let mut sinks = self.sinks.write().unwrap_or_else(|e| e.into_inner());
        sinks.entry(channel).or_default().push(sink);
    }

    pub fn enabled(&self, channel: LogChannel) -> bool {
        let sinks = self.sinks.read().unwrap_or_else(|e| e.into_inner());
        sinks.get(&channel).is_some_and(|s| !s.is_empty())
    }

    pub fn write(&self, channel: LogChannel, message: &str) {
        let sinks = self.sinks.read().unwrap_or_else(|e| e.into_inner());
        if let Some(sinks) = sinks.get(&channel) {
            for sink in sinks {
                sink.write(message);
            }
        }
    }
}
