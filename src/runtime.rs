use crate::project::{ClangProject, FileModified, ProjectEvent};
use crate::watcher::Watcher;
use notify::EventKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const SAVE_TIMEOUT: Duration = Duration::from_millis(2000);
pub const SYNC_TIMEOUT: Duration = Duration::from_millis(2000);
pub const MODIFIED_FILES_TIMEOUT: Duration = Duration::from_millis(50);

/// Daemon-side loop for one project: owns the watcher and the debounce,
/// sync and save timers. The indexing core stays synchronous; this loop is
/// the only async part and never holds the project lock across awaits.
pub struct ProjectRuntime {
    project: Arc<ClangProject>,
    watcher: Watcher,
    cancel: CancellationToken,
}

impl ProjectRuntime {
    pub fn new(project: Arc<ClangProject>, cancel: CancellationToken) -> crate::Result<Self> {
        let watcher = Watcher::new()?;
        Ok(Self {
            project,
            watcher,
            cancel,
        })
    }

    /// Runs until cancelled. Modified files are coalesced for
    /// `MODIFIED_FILES_TIMEOUT`; when the job set drains, sync fires after
    /// `SYNC_TIMEOUT` (immediately after dirty batches) and save
    /// `SAVE_TIMEOUT` later. Scheduling new work cancels both timers.
    pub async fn run(mut self) {
        let Some(mut events) = self.project.take_events() else {
            tracing::error!("project event stream already taken");
            return;
        };

        let mut modified_at: Option<Instant> = None;
        let mut sync_at: Option<Instant> = None;
        let mut save_at: Option<Instant> = None;

        tracing::info!("watching {}", self.project.path().display());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                event = self.watcher.next_event() => {
                    let Some(event) = event else { break };
                    if !relevant(&event.kind, self.project.options.no_file_manager_watch) {
                        continue;
                    }
                    for path in &event.paths {
                        match self.project.on_file_modified(path) {
                            FileModified::StartDirty => {
                                modified_at = None;
                                self.project.start_dirty_jobs();
                            }
                            FileModified::Debounce => {
                                modified_at = Some(Instant::now() + MODIFIED_FILES_TIMEOUT);
                            }
                            FileModified::Ignored => {}
                        }
                    }
                }

                event = events.recv() => {
                    match event {
                        Some(ProjectEvent::Indexing) => {
                            sync_at = None;
                            save_at = None;
                        }
                        Some(ProjectEvent::JobsDrained { immediate }) => {
                            let delay = if immediate { Duration::ZERO } else { SYNC_TIMEOUT };
                            sync_at = Some(Instant::now() + delay);
                        }
                        Some(ProjectEvent::WatchDir(dir)) => {
                            if let Err(err) = self.watcher.watch(&dir) {
                                tracing::debug!("failed to watch {}: {err}", dir.display());
                            }
                        }
                        None => break,
                    }
                }

                _ = sleep_until(modified_at), if modified_at.is_some() => {
                    modified_at = None;
                    self.project.start_dirty_jobs();
                }

                _ = sleep_until(sync_at), if sync_at.is_some() => {
                    sync_at = None;
                    self.project.sync();
                    save_at = Some(Instant::now() + SAVE_TIMEOUT);
                }

                _ = sleep_until(save_at), if save_at.is_some() => {
                    save_at = None;
                    if let Err(err) = self.project.save() {
                        tracing::error!("save failed: {err}");
                    }
                }
            }
        }

        tracing::info!("runtime loop for {} ended", self.project.path().display());
    }
}

fn relevant(kind: &EventKind, no_file_manager_watch: bool) -> bool {
    match kind {
        EventKind::Modify(_) | EventKind::Remove(_) => true,
        EventKind::Create(_) => !no_file_manager_watch,
        _ => false,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
