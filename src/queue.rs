//! Bounded-concurrency job queue.
//!
//! Jobs are submitted up front, `concurrency` of them run at a time on
//! a `threadpool::ThreadPool`, and the caller blocks on a single "all
//! done" signal rather than polling. There is no async runtime here —
//! every `Job::start` body runs straight through on its worker thread.
//!
//! Generic over `J: Job + Send + 'static` rather than over a trait
//! object, so that once a job finishes the caller gets the concrete
//! type back — with its fetched bytes, reader, or error still on it —
//! instead of having to downcast out of a `Box<dyn Job>`.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};

use threadpool::ThreadPool;

use crate::job::Job;

/// Runs a fixed batch of jobs with bounded concurrency and hands back
/// every job, completed, keyed by its id.
///
/// A `JobQueue` is single-use: construct it, `enqueue` every job up
/// front, then `run` once; build a fresh one for the next pull.
pub struct JobQueue<J: Job + Send + 'static> {
    pool: ThreadPool,
    jobs: Vec<J>,
}

impl<J: Job + Send + 'static> JobQueue<J> {
    pub fn new(concurrency: usize) -> Self {
        JobQueue {
            pool: ThreadPool::new(concurrency.max(1)),
            jobs: Vec::new(),
        }
    }

    /// Queue a job for execution. Jobs do not start until `run` is
    /// called.
    pub fn enqueue(&mut self, job: J) {
        self.jobs.push(job);
    }

    /// Run every enqueued job to completion, respecting the queue's
    /// concurrency bound, and return the completed jobs keyed by id.
    ///
    /// Blocks until all jobs have finished: the pool drains a one-shot
    /// "done" signal sent after the last job's completion fires,
    /// rather than spinning on a shared counter.
    pub fn run(mut self) -> HashMap<String, J> {
        let total = self.jobs.len();
        if total == 0 {
            return HashMap::new();
        }

        let completed = Arc::new(Mutex::new(HashMap::with_capacity(total)));
        let remaining = Arc::new(Mutex::new(total));
        let (done_tx, done_rx) = sync_channel::<()>(1);
        let done_tx: Arc<Mutex<Option<SyncSender<()>>>> = Arc::new(Mutex::new(Some(done_tx)));

        for mut job in self.jobs.drain(..) {
            let completed = Arc::clone(&completed);
            let remaining = Arc::clone(&remaining);
            let done_tx = Arc::clone(&done_tx);

            self.pool.execute(move || {
                job.start();
                let id = job.id().to_string();
                completed.lock().unwrap().insert(id, job);
                drop(completed);

                let mut left = remaining.lock().unwrap();
                *left -= 1;
                let is_last = *left == 0;
                drop(left);
                if is_last {
                    if let Some(tx) = done_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                }
            });
        }

        let _ = done_rx.recv();
        Arc::try_unwrap(completed)
            .unwrap_or_else(|arc| panic!("{} outstanding references to completed map after done signal, held {} entries", Arc::strong_count(&arc), arc.lock().unwrap().len()))
            .into_inner()
            .unwrap()
    }
}
