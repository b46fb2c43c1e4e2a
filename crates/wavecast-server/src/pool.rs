//! Fixed-size worker pool for command handling.
//!
//! Workers block on a bounded FIFO of boxed jobs; each job handles exactly
//! one readiness event. Shutdown closes the channel, lets workers drain
//! whatever is already queued, and joins them.

use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, bounded};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_depth: usize) -> Result<Self> {
        let (tx, rx) = bounded::<Job>(queue_depth);
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("wavecast-worker-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .with_context(|| format!("spawn worker thread {i}"))?;
            handles.push(handle);
        }
        Ok(Self {
            tx: Some(tx),
            workers: handles,
        })
    }

    /// Queue one unit of work. Blocks while the FIFO is full; fails once the
    /// pool has been shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| anyhow!("worker pool is shut down"))?;
        tx.send(Box::new(job))
            .map_err(|_| anyhow!("worker pool is shut down"))
    }

    /// Stop accepting work, drain in-flight jobs, and join every worker.
    pub fn shutdown(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
