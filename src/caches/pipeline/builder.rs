//! Bounded thread pool that compiles pipelines off the render thread.
//!
//! Mirrors the scheduler's single-purpose worker thread, just generalized to
//! N workers pulling boxed build jobs off one shared queue. Jobs are not
//! ordered relative to each other; only completion-before-use (via each
//! pipeline's own condvar) matters.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads draining a shared job queue.
pub struct PipelineWorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineWorkerPool {
    /// Spawn `thread_count` workers (minimum 1).
    #[must_use]
    pub fn new(thread_count: usize) -> Arc<Self> {
        let thread_count = thread_count.max(1);
        let (sender, receiver) = std::sync::mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let receiver: Arc<Mutex<Receiver<Job>>> = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("vk-render-core-pipeline-builder-{index}"))
                .spawn(move || Self::worker_main(&receiver))
                .expect("failed to spawn pipeline builder thread");
            workers.push(handle);
        }

        Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    fn worker_main(receiver: &Arc<Mutex<Receiver<Job>>>) {
        loop {
            let job = {
                let guard = receiver.lock().unwrap();
                guard.recv()
            };
            match job {
                Ok(job) => job(),
                Err(_) => return,
            }
        }
    }

    /// Enqueue `job`. Silently dropped (and logged) if every worker has
    /// already shut down, which only happens during process teardown.
    pub fn submit(&self, job: Job) {
        let sent = self
            .sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|sender| sender.send(job).is_ok());
        if !sent {
            log::error!("pipeline builder pool: all workers gone, dropping build job");
        }
    }
}

impl Drop for PipelineWorkerPool {
    fn drop(&mut self) {
        // Drop the sender first so each worker's blocking `recv()` observes a
        // closed channel and returns, instead of joining threads that are
        // still waiting on a channel we're holding open.
        self.sender.lock().unwrap().take();
        for worker in self.workers.lock().unwrap().drain(..) {
            let _ = worker.join();
        }
    }
}
