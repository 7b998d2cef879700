//! A fixed set of worker threads, each with its own job queue, so deferred
//! work can be aimed at a context other than the one queuing it.

use crate::error::{Error, Result};
use crossbeam::channel::{unbounded, Sender};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

pub struct WorkQueue {
    name: String,
    senders: Vec<Sender<Job>>,
    workers: Vec<Worker>,
}

impl WorkQueue {
    pub fn new(name: &str, contexts: usize) -> Result<Self> {
        if contexts == 0 {
            return Err(Error::invalid("a work queue needs at least one context"));
        }
        let mut queue = WorkQueue {
            name: name.to_string(),
            senders: Vec::with_capacity(contexts),
            workers: Vec::with_capacity(contexts),
        };
        for id in 0..contexts {
            let (sender, receiver) = unbounded::<Job>();
            let thread_name = format!("{name}/{id}");
            let thread = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    for job in receiver {
                        job();
                    }
                    tracing::debug!("worker {id} shutting down");
                })
                .map_err(|err| Error::spawn(thread_name, err))?;
            queue.senders.push(sender);
            queue.workers.push(Worker {
                id,
                thread: Some(thread),
            });
        }
        Ok(queue)
    }

    pub fn contexts(&self) -> usize {
        self.senders.len()
    }

    /// Context to hand work to from `current`: the previous one, wrapping
    /// 0 to 1, so the queuing context keeps running what it was doing.
    pub fn neighbour(&self, current: usize) -> usize {
        let contexts = self.contexts();
        if current % contexts == 0 {
            1 % contexts
        } else {
            current % contexts - 1
        }
    }

    /// Queues `job` on `context` (taken modulo the number of contexts).
    /// Returns false if that worker is gone.
    pub fn queue_on<F>(&self, context: usize, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = &self.senders[context % self.senders.len()];
        sender.send(Box::new(job)).is_ok()
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        // Closing the channels lets each worker finish its backlog and exit.
        self.senders.clear();
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    tracing::warn!("{} worker {} panicked", self.name, worker.id);
                }
            }
        }
    }
}
