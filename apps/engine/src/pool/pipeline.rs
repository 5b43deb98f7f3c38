//! Pipeline-execution pool.
//!
//! Each worker is a dedicated OS thread. When it picks up a job it builds a
//! fresh current-thread tokio runtime owned by that job alone, so two jobs
//! can never contend for one reactor. Admission is a bounded queue; a full
//! queue rejects the submission with an explicit backpressure error.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error};

use crate::errors::SubmitError;

/// A queued unit of work. Receives the worker's private runtime for the
/// duration of one job.
pub type PipelineJob = Box<dyn FnOnce(&tokio::runtime::Runtime) + Send + 'static>;

pub struct PipelinePool {
    queue: Option<SyncSender<PipelineJob>>,
    workers: Vec<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
    queue_depth: usize,
}

impl PipelinePool {
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = sync_channel::<PipelineJob>(queue_depth);
        let rx = Arc::new(Mutex::new(rx));
        let active = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers)
            .map(|i| {
                let rx = Arc::clone(&rx);
                let active = Arc::clone(&active);
                std::thread::Builder::new()
                    .name(format!("pipeline-worker-{i}"))
                    .spawn(move || worker_loop(i, &rx, &active))
                    .expect("failed to spawn pipeline worker")
            })
            .collect();

        Self {
            queue: Some(tx),
            workers: handles,
            active,
            queue_depth,
        }
    }

    /// Enqueues a job without blocking. A full queue is an explicit
    /// `PoolExhausted`, never a silent drop.
    pub fn dispatch(&self, job: PipelineJob) -> Result<(), SubmitError> {
        let queue = self.queue.as_ref().ok_or(SubmitError::PoolClosed)?;
        match queue.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SubmitError::PoolExhausted(self.queue_depth)),
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::PoolClosed),
        }
    }

    /// Jobs currently occupying a pool slot.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

fn worker_loop(index: usize, rx: &Mutex<Receiver<PipelineJob>>, active: &AtomicUsize) {
    loop {
        // Hold the receiver lock only while dequeuing, never while running.
        let job = match rx.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => break, // another worker panicked while dequeuing
        };
        let job = match job {
            Ok(job) => job,
            Err(_) => break, // pool dropped the sender; shut down
        };

        // Slot acquired on dequeue, released exactly once below.
        active.fetch_add(1, Ordering::SeqCst);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build per-job runtime");

        // A panic escaping the job must never take down the pool. The job
        // wrapper converts panics into a failed status before this boundary;
        // this is the last-resort containment.
        let result = catch_unwind(AssertUnwindSafe(|| job(&runtime)));
        if let Err(panic) = result {
            error!(worker = index, "job escaped with panic: {:?}", panic_message(&panic));
        }

        active.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker = index, "pipeline worker stopped");
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Drop for PipelinePool {
    fn drop(&mut self) {
        // Closing the queue lets workers drain and exit.
        self.queue.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
