use crate::util::{lock, wait};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// A unit of work the pool can run. Jobs are shared handles; `execute`
/// consumes one clone so the job can finish its own bookkeeping.
pub trait PoolJob: Send + Sync + 'static {
    fn job_id(&self) -> u64;
    fn execute(self: Arc<Self>);
}

struct PoolQueue {
    jobs: VecDeque<Arc<dyn PoolJob>>,
    shutdown: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    available: Condvar,
}

/// Fixed-size pool of worker threads running parse jobs. Queued jobs can be
/// pulled back out before a worker picks them up; running jobs are beyond
/// the pool's reach and must be stopped through their own abort protocol.
pub struct JobPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobPool {
    pub fn new(threads: usize, stack_size: usize) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let workers = (0..threads.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                let mut builder = std::thread::Builder::new().name(format!("parse-{i}"));
                if stack_size > 0 {
                    builder = builder.stack_size(stack_size);
                }
                builder
                    .spawn(move || worker_loop(&shared))
                    .expect("spawning parse worker")
            })
            .collect();

        Self { shared, workers }
    }

    pub fn start(&self, job: Arc<dyn PoolJob>) {
        let mut queue = lock(&self.shared.queue);
        queue.jobs.push_back(job);
        drop(queue);
        self.shared.available.notify_one();
    }

    /// Unqueues a job that has not started yet. Returns false when the job
    /// is already running (or finished), in which case the caller must go
    /// through stop/wait instead.
    pub fn remove(&self, job_id: u64) -> bool {
        let mut queue = lock(&self.shared.queue);
        if let Some(pos) = queue.jobs.iter().position(|j| j.job_id() == job_id) {
            queue.jobs.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn queued(&self) -> usize {
        lock(&self.shared.queue).jobs.len()
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut queue = lock(&shared.queue);
            loop {
                if queue.shutdown {
                    return;
                }
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                queue = wait(&shared.available, queue);
            }
        };
        job.execute();
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        lock(&self.shared.queue).shutdown = true;
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
