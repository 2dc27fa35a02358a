//! A fixed set of worker threads consuming a shared FIFO job queue.
use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard,
    },
    thread::JoinHandle,
};

use super::Signal;
use crate::Result;

/// Processes jobs submitted to a [`WorkerPool`].
///
/// Implemented for any `Fn(J) -> Result<bool>` closure.
pub trait JobHandler<J>: Send + Sync + 'static {
    /// Handle one job. Returns `Ok(false)` if the job finished without doing what was asked,
    /// which counts as a failure for [`WorkerPool::wait_for_completion`].
    fn handle(&self, job: J) -> Result<bool>;
}

impl<J, F> JobHandler<J> for F
where
    F: Fn(J) -> Result<bool> + Send + Sync + 'static,
{
    fn handle(&self, job: J) -> Result<bool> {
        self(job)
    }
}

struct Queue<J> {
    jobs: VecDeque<J>,
    in_flight: usize,
    stopping: bool,
}

struct Shared<J> {
    queue: Mutex<Queue<J>>,
    /// Notified when a job is submitted or the pool is stopping.
    work_available: Condvar,
    /// Notified when the queue is empty and no job is in flight.
    idle: Condvar,
    failed: AtomicBool,
}

impl<J> Shared<J> {
    fn lock(&self) -> MutexGuard<'_, Queue<J>> {
        // Jobs run outside of the lock, so poisoning cannot leave the queue half-updated.
        self.queue.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Fans jobs out to a fixed number of worker threads, with a completion barrier.
///
/// Jobs are taken in FIFO order, but there is no ordering guarantee between jobs running on
/// different workers. The pool does not de-duplicate jobs, so two jobs for the same key may run
/// at the same time; handlers serialize them if needed.
pub struct WorkerPool<J> {
    name: String,
    worker_count: usize,
    handler: Arc<dyn JobHandler<J>>,
    shared: Arc<Shared<J>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Create a pool of `worker_count` workers (at least one) that handles jobs with `handler`.
    ///
    /// Workers are not launched until [`WorkerPool::start`] is called.
    pub fn new(
        name: impl Into<String>,
        worker_count: usize,
        handler: impl JobHandler<J>,
    ) -> WorkerPool<J> {
        WorkerPool {
            name: name.into(),
            worker_count: worker_count.max(1),
            handler: Arc::new(handler),
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    jobs: VecDeque::new(),
                    in_flight: 0,
                    stopping: false,
                }),
                work_available: Condvar::new(),
                idle: Condvar::new(),
                failed: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Launch the worker threads.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a worker thread could not be spawned.
    pub fn start(&self) -> std::io::Result<()> {
        let mut workers = self.workers.lock().unwrap_or_else(|err| err.into_inner());
        if !workers.is_empty() {
            log::warn!(target: "splitsync", pool = self.name.as_str(); "worker pool is already started");
            return Ok(());
        }
        self.shared.lock().stopping = false;

        for index in 0..self.worker_count {
            let shared = Arc::clone(&self.shared);
            let handler = Arc::clone(&self.handler);
            let name = self.name.clone();
            let handle = std::thread::Builder::new()
                .name(format!("splitsync-{}-{}", self.name, index))
                .spawn(move || worker_loop(&name, &shared, &*handler))?;
            workers.push(handle);
        }
        Ok(())
    }

    /// Enqueue a job. Never blocks on job execution.
    ///
    /// Returns `false` (dropping the job) if the pool is stopping: nothing would ever run it.
    pub fn submit_work(&self, job: J) -> bool {
        let mut queue = self.shared.lock();
        if queue.stopping {
            log::warn!(target: "splitsync", pool = self.name.as_str(); "job submitted to a stopped worker pool, dropping it");
            return false;
        }
        queue.jobs.push_back(job);
        self.shared.work_available.notify_one();
        true
    }

    /// Block until every submitted job has been handled.
    ///
    /// Returns `true` if any job failed since the previous call, clearing the failure flag.
    pub fn wait_for_completion(&self) -> bool {
        let mut queue = self.shared.lock();
        while !queue.jobs.is_empty() || queue.in_flight > 0 {
            queue = self
                .shared
                .idle
                .wait(queue)
                .unwrap_or_else(|err| err.into_inner());
        }
        drop(queue);
        self.shared.failed.swap(false, Ordering::SeqCst)
    }

    /// Ask the workers to exit once the queue is drained.
    ///
    /// This does not block. If `done` is provided, it is set once every worker thread has
    /// terminated.
    pub fn stop(&self, done: Option<Signal>) {
        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(|err| err.into_inner()));
        {
            let mut queue = self.shared.lock();
            queue.stopping = true;
        }
        self.shared.work_available.notify_all();

        let Some(done) = done else {
            return;
        };
        if workers.is_empty() {
            done.set();
            return;
        }

        let name = self.name.clone();
        let joiner = std::thread::Builder::new()
            .name(format!("splitsync-{}-stop", self.name))
            .spawn(move || {
                for worker in workers {
                    if worker.join().is_err() {
                        log::error!(target: "splitsync", pool = name.as_str(); "worker thread panicked");
                    }
                }
                done.set();
            });
        if let Err(err) = joiner {
            // Nothing will ever join the workers; they still exit on their own.
            log::error!(target: "splitsync", pool = self.name.as_str(); "failed to spawn worker pool stop thread: {}", err);
        }
    }
}

impl<J> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        // Idle workers would otherwise wait for jobs forever.
        self.shared.lock().stopping = true;
        self.shared.work_available.notify_all();
    }
}

fn worker_loop<J: 'static>(name: &str, shared: &Shared<J>, handler: &dyn JobHandler<J>) {
    loop {
        let job = {
            let mut queue = shared.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    queue.in_flight += 1;
                    break job;
                }
                if queue.stopping {
                    log::debug!(target: "splitsync", pool = name; "worker exiting");
                    return;
                }
                queue = shared
                    .work_available
                    .wait(queue)
                    .unwrap_or_else(|err| err.into_inner());
            }
        };

        let ok = match catch_unwind(AssertUnwindSafe(|| handler.handle(job))) {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                log::debug!(target: "splitsync", pool = name; "job did not complete successfully");
                false
            }
            Ok(Err(err)) => {
                log::warn!(target: "splitsync", pool = name; "job failed: {}", err);
                false
            }
            Err(_panic) => {
                log::error!(target: "splitsync", pool = name; "job panicked");
                false
            }
        };
        if !ok {
            shared.failed.store(true, Ordering::SeqCst);
        }

        let mut queue = shared.lock();
        queue.in_flight -= 1;
        if queue.jobs.is_empty() && queue.in_flight == 0 {
            shared.idle.notify_all();
        }
    }
}
