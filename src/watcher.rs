use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::Path;
use tokio::sync::mpsc;

/// Filesystem watcher feeding events into the runtime loop. Directories
/// are registered individually as files enter the dependency graph.
pub struct Watcher {
    inner: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl Watcher {
    pub fn new() -> notify::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        Ok(Self { inner, rx })
    }

    pub fn watch(&mut self, dir: &Path) -> notify::Result<()> {
        self.inner.watch(dir, RecursiveMode::NonRecursive)
    }

    pub fn unwatch(&mut self, dir: &Path) -> notify::Result<()> {
        self.inner.unwatch(dir)
    }

    /// Next filesystem event; backend errors are logged and skipped.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Some(Ok(event)) => return Some(event),
                Some(Err(err)) => tracing::warn!("watch error: {err}"),
                None => return None,
            }
        }
    }
}
