//! Data-operations pool for short-lived blocking I/O.
//!
//! Async stages hand blocking closures here and await the result over a
//! oneshot channel, so document/artifact store calls never block a pipeline
//! worker's reactor and never starve the submitting caller.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{StageError, SubmitError};

type DataJob = Box<dyn FnOnce() + Send + 'static>;

pub struct DataPool {
    queue: Option<SyncSender<DataJob>>,
    workers: Vec<JoinHandle<()>>,
    queue_depth: usize,
}

impl DataPool {
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = sync_channel::<DataJob>(queue_depth);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|i| {
                let rx = Arc::clone(&rx);
                std::thread::Builder::new()
                    .name(format!("data-worker-{i}"))
                    .spawn(move || worker_loop(i, &rx))
                    .expect("failed to spawn data worker")
            })
            .collect();

        Self {
            queue: Some(tx),
            workers: handles,
            queue_depth,
        }
    }

    /// Fire-and-forget execution of a blocking closure.
    pub fn execute(&self, job: DataJob) -> Result<(), SubmitError> {
        let queue = self.queue.as_ref().ok_or(SubmitError::PoolClosed)?;
        match queue.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SubmitError::PoolExhausted(self.queue_depth)),
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::PoolClosed),
        }
    }

    /// Runs a blocking closure on the pool and awaits its result without
    /// blocking the calling task's reactor.
    pub async fn run<T, F>(&self, f: F) -> Result<T, StageError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(Box::new(move || {
            let _ = tx.send(f());
        }))
        .map_err(|e| StageError::TransientIo(format!("data pool rejected work: {e}")))?;

        rx.await
            .map_err(|_| StageError::TransientIo("data pool dropped work".into()))
    }
}

fn worker_loop(index: usize, rx: &Mutex<Receiver<DataJob>>) {
    loop {
        let job = match rx.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => break,
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
    debug!(worker = index, "data worker stopped");
}

impl Drop for DataPool {
    fn drop(&mut self) {
        self.queue.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_closure_result() {
        let pool = DataPool::new(2, 8);
        let value = pool.run(|| 7 * 6).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_propagates_io_results() {
        let pool = DataPool::new(1, 8);
        let result: Result<String, String> = pool.run(|| Err("disk on fire".to_string())).await.unwrap();
        assert_eq!(result.unwrap_err(), "disk on fire");
    }

    #[test]
    fn test_full_queue_rejects() {
        let pool = DataPool::new(1, 1);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        let blocker = Arc::clone(&release_rx);
        pool.execute(Box::new(move || {
            blocker.lock().unwrap().recv().unwrap();
        }))
        .unwrap();

        let mut rejected = false;
        for _ in 0..4 {
            if matches!(
                pool.execute(Box::new(|| {})),
                Err(SubmitError::PoolExhausted(1))
            ) {
                rejected = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(rejected);
        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_execute_runs_in_background() {
        let pool = DataPool::new(2, 8);
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || tx.send(1).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }
}
