//! Bounded dispatch pool for inbound events.
//!
//! A listener hands each decoded event to [`Dispatcher::dispatch`]. The event runs on
//! a worker task if one of `workers` slots is free, otherwise it waits in a queue of
//! `queue` slots. When both are full the listener runs the event itself, which slows
//! that channel down instead of dropping anything.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::trace;

/// Where an event ended up running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Spawned,
    Queued,
    Inline,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    workers: Arc<Semaphore>,
    queue: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(workers: usize, queue: usize) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(workers.max(1))),
            queue: Arc::new(Semaphore::new(queue)),
        }
    }

    pub fn idle_workers(&self) -> usize {
        self.workers.available_permits()
    }

    pub async fn dispatch<F>(&self, job: F) -> Dispatched
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(worker) = self.workers.clone().try_acquire_owned() {
            tokio::spawn(async move {
                job.await;
                drop(worker);
            });
            return Dispatched::Spawned;
        }

        if let Ok(slot) = self.queue.clone().try_acquire_owned() {
            let workers = self.workers.clone();
            tokio::spawn(async move {
                let worker = workers.acquire_owned().await;
                drop(slot);
                job.await;
                drop(worker);
            });
            return Dispatched::Queued;
        }

        trace!("Dispatch pool saturated, running on listener");
        job.await;
        Dispatched::Inline
    }
}
