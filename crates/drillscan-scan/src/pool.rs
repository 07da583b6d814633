//! Fixed-size worker pool with drain detection.
//!
//! Jobs may submit further jobs. The pending counter is raised before a job
//! is queued and lowered only after the job has returned, so any submissions
//! a job makes are already counted by the time its own count is released.
//! The counter therefore reaches zero only when no work is queued, running,
//! or about to be queued.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Shared {
    fn finish_one(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Cloneable submission handle, usable from inside running jobs.
#[derive(Clone)]
pub struct PoolHandle {
    tx: Sender<Message>,
    shared: Arc<Shared>,
}

impl PoolHandle {
    /// Queue a job. Returns `false` if the pool has shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        *self.shared.pending.lock() += 1;
        if self.tx.send(Message::Run(Box::new(job))).is_err() {
            self.shared.finish_one();
            return false;
        }
        true
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        *self.shared.pending.lock()
    }

    /// Block until no job is queued or running.
    pub fn wait_idle(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.idle.wait(&mut pending);
        }
    }
}

/// A fixed set of named worker threads over one unbounded queue.
pub struct WorkerPool {
    handle: PoolHandle,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` workers (at least one) named `{name}-{index}`.
    pub fn new(size: usize, name: &str) -> io::Result<Self> {
        let size = size.max(1);
        let (tx, rx) = crossbeam_channel::unbounded::<Message>();
        let shared = Arc::new(Shared::default());

        let mut pool = Self {
            handle: PoolHandle { tx, shared },
            workers: Vec::with_capacity(size),
        };

        for index in 0..size {
            let rx = rx.clone();
            let shared = Arc::clone(&pool.handle.shared);
            // On error the partially built pool is dropped, which stops the
            // workers already started.
            let worker = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&rx, &shared))?;
            pool.workers.push(worker);
        }

        debug!(workers = size, "Worker pool started");
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// A handle for submitting jobs.
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Queue a job.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.submit(job)
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.handle.pending()
    }

    /// Block until no job is queued or running.
    pub fn wait_idle(&self) {
        self.handle.wait_idle();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.handle.tx.send(Message::Shutdown);
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Scan worker exited abnormally");
            }
        }
    }
}

fn worker_loop(rx: &Receiver<Message>, shared: &Shared) {
    while let Ok(message) = rx.recv() {
        match message {
            Message::Run(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("Scan task panicked; continuing");
                }
                shared.finish_one();
            }
            Message::Shutdown => break,
        }
    }
}
