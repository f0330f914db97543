//! Shared pool for background hook buckets
//!
//! Each dispatched job is one self-contained background bucket: the hooks
//! of the bucket run sequentially inside the job against their snapshot
//! registry, and jobs from different buckets run concurrently. The pool is
//! deliberately small and long-lived; jobs themselves are short.

use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

pub(crate) type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct BackgroundInvoker {
    tx: Option<Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl BackgroundInvoker {
    pub fn new(pool_size: usize) -> Self {
        let (tx, rx) = channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let threads = (0..pool_size.max(1))
            .filter_map(|i| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("dirigir-background-{i}"))
                    .spawn(move || loop {
                        let job = {
                            let rx = rx.lock().unwrap_or_else(PoisonError::into_inner);
                            rx.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .map_err(|e| log::warn!("failed to spawn background thread: {e}"))
                    .ok()
            })
            .collect();
        Self {
            tx: Some(tx),
            threads,
        }
    }

    pub fn dispatch(&self, job: Job) {
        if let Some(tx) = &self.tx {
            if tx.send(job).is_err() {
                log::warn!("background pool is shut down, dropping job");
            }
        }
    }
}

impl Drop for BackgroundInvoker {
    fn drop(&mut self) {
        // Closing the channel drains the pool
        self.tx.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
