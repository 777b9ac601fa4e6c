use crate::db::{self, MergeMode};
use crate::job::{IndexData, JobType, ParseJob};
use crate::location::FileId;
use crate::model::SourceInformation;
use crate::pool::PoolJob;
use crate::project::ClangProject;
use crate::util::lock;
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, Weak};

pub(crate) struct UnitState {
    pub source_information: SourceInformation,
    /// Epoch seconds of the last completed parse.
    pub indexed: u64,
    pub job: Option<Arc<ParseJob>>,
}

/// Per-source-file job holder: owns the current source information and the
/// latest parse job, and serializes job replacement so one file's merges
/// and dirties never interleave.
pub struct SourceUnit {
    pub(crate) file_id: FileId,
    project: Weak<ClangProject>,
    pub(crate) state: Mutex<UnitState>,
    pub(crate) cond: Condvar,
}

impl SourceUnit {
    pub(crate) fn new(file_id: FileId, project: Weak<ClangProject>) -> Self {
        Self {
            file_id,
            project,
            state: Mutex::new(UnitState {
                source_information: SourceInformation::default(),
                indexed: 0,
                job: None,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn indexed(&self) -> u64 {
        lock(&self.state).indexed
    }

    /// Replaces the in-flight job with a new one for `info`.
    ///
    /// Any previous job is first unqueued, or stopped and waited out if it
    /// already started; that wait is what orders job N's merge before job
    /// N+1's dirty. The caller registers and submits the returned job.
    pub(crate) fn reindex(
        unit: &Arc<SourceUnit>,
        project: &Arc<ClangProject>,
        info: SourceInformation,
        job_type: JobType,
    ) -> Arc<ParseJob> {
        // The file was claimed by an earlier job; give the claim back, and
        // the claims on everything it pulled in, so the new parse may
        // re-emit those symbols.
        if project.services.seen.release(unit.file_id) {
            let mut deps = HashSet::new();
            {
                let state = project.lock_state();
                db::add_deps(unit.file_id, &state.db.depends, &mut deps);
            }
            project.services.seen.release_all(deps.iter());
        }

        let mut state = lock(&unit.state);
        loop {
            let job = match &state.job {
                Some(job) if !job.is_done() => job.clone(),
                _ => break,
            };
            if project.pool.remove(job.job_id()) {
                // never started; undo its scheduling bookkeeping
                state.job = None;
                project.discard_job(&job);
                break;
            }
            job.stop();
            drop(state);
            job.wait();
            state = lock(&unit.state);
        }

        let reparse = state.source_information == info;
        if !reparse {
            state.source_information = info.clone();
        }
        let job = Arc::new(ParseJob::new(
            unit.clone(),
            project,
            info,
            job_type,
            reparse,
        ));
        state.job = Some(job.clone());
        job
    }

    /// Folds a job's staging buffer into the project database under the
    /// project lock. `last_build` marks the final merge of the job, which
    /// is the one that retires its pending slot.
    pub(crate) fn merge(&self, data: &IndexData, mode: MergeMode, last_build: bool) {
        let Some(project) = self.project.upgrade() else {
            return;
        };
        let mut state = project.lock_state();

        if last_build {
            state.pending_jobs = state.pending_jobs.saturating_sub(1);
        }

        if mode.dirty {
            state.db.dirty(self.file_id, mode);
        }
        state.db.merge(data);

        for (file, claimed) in &data.local_seen {
            if *claimed {
                state.visited_files.insert(*file);
            }
            state.pending_dirty_files.remove(file);
        }
        state.pending_dirty_files.remove(&self.file_id);

        project.watch_new_files(&mut state, data);

        if state.pending_jobs == 0 {
            tracing::info!(
                "parsed {} files in {} ms",
                state.job_counter,
                state.started.elapsed().as_millis()
            );
        }
    }
}
