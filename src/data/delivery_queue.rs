use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Receiver, Sender};

use crate::data::utils::{lock, panic_message};
use crate::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Run(Job),
    Flush(Sender<()>),
}

struct QueueInner {
    name: String,
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

/// A serial queue that runs notification deliveries on its own thread.
///
/// Jobs run one at a time in the order they were enqueued. Clones share the
/// same worker. The worker stops once [`DeliveryQueue::shutdown`] is called
/// or the last clone is dropped, after running everything already queued.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

impl DeliveryQueue {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = channel::unbounded::<Command>();

        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(receiver))
            .map_err(|e| Error::Queue(format!("Failed to spawn '{}': {}", name, e)))?;

        log::debug!("Started delivery queue '{}'", name);

        Ok(DeliveryQueue {
            inner: Arc::new(QueueInner {
                worker_id: worker.thread().id(),
                name,
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue `job` behind everything already enqueued.
    ///
    /// Returns false (and drops the job) if the queue has been shut down.
    pub fn enqueue<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = lock(&self.inner.sender);
        match sender.as_ref() {
            Some(sender) => sender.send(Command::Run(Box::new(job))).is_ok(),
            None => {
                log::warn!("Delivery queue '{}' is shut down, dropping job", self.inner.name);
                false
            }
        }
    }

    /// Block until every job enqueued before this call has run.
    ///
    /// Returns immediately when called from the queue's own thread or after
    /// shutdown.
    pub fn flush(&self) {
        if self.is_current() {
            return;
        }

        let (done_tx, done_rx) = channel::bounded(1);
        let sent = {
            let sender = lock(&self.inner.sender);
            match sender.as_ref() {
                Some(sender) => sender.send(Command::Flush(done_tx)).is_ok(),
                None => false,
            }
        };

        if sent {
            let _ = done_rx.recv();
        }
    }

    /// Stop accepting jobs, run what is queued, then join the worker.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.inner.sender).is_none()
    }

    /// True when called from inside a job running on this queue
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.worker_id
    }

    pub(crate) fn same_queue(&self, other: &DeliveryQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("name", &self.inner.name)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl QueueInner {
    fn shutdown(&self) {
        // Dropping the sender ends the worker loop once the channel drains
        let sender = lock(&self.sender).take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        if thread::current().id() == self.worker_id {
            return;
        }

        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                log::error!("Delivery queue '{}' worker panicked", self.name);
            }
        }
        log::debug!("Stopped delivery queue '{}'", self.name);
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Receiver<Command>) {
    for command in receiver.iter() {
        match command {
            Command::Run(job) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                    log::error!("Delivery job panicked: {}", panic_message(panic.as_ref()));
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
