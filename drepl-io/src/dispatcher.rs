use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

use drepl_error::{DreplResult, drepl_bail, drepl_err};
use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send>;

/// A pool of worker threads running detached, fire-and-forget tasks.
///
/// Tasks carry no completion handle. Callers that need to observe completion, such as tests or
/// an orderly shutdown, use [`Dispatcher::wait_idle`], which blocks until every task submitted so
/// far has run.
#[derive(Debug)]
pub struct Dispatcher {
    submitter: flume::Sender<Task>,
    threads: Vec<JoinHandle<()>>,
    pending: Arc<Pending>,
}

#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn start(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

impl Dispatcher {
    pub fn new(num_threads: usize) -> DreplResult<Self> {
        if num_threads == 0 {
            drepl_bail!(Configuration: "dispatcher needs at least one worker thread");
        }

        let (submitter, rx) = flume::unbounded::<Task>();
        let pending = Arc::new(Pending::default());
        let threads = (0..num_threads)
            .map(|tid| {
                let rx = rx.clone();
                let pending = Arc::clone(&pending);
                std::thread::Builder::new()
                    .name(format!("drepl-replicate-{tid}"))
                    .spawn(move || {
                        while let Ok(task) = rx.recv() {
                            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                                log::error!("replication task panicked on worker {tid}");
                            }
                            pending.finish();
                        }
                    })
                    .map_err(|e| drepl_err!(IOError: e).with_context("spawning replication worker"))
            })
            .collect::<DreplResult<Vec<_>>>()?;

        Ok(Self {
            submitter,
            threads,
            pending,
        })
    }

    /// Queues `task` to run on one of the workers.
    pub fn dispatch<F>(&self, task: F) -> DreplResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.start();
        if let Err(err) = self.submitter.send(Box::new(task)) {
            self.pending.finish();
            drepl_bail!("Dispatcher error spawning task: {err}");
        }
        Ok(())
    }

    /// Blocks until all queued tasks have run.
    pub fn wait_idle(&self) {
        self.pending.wait();
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Gracefully shutdown the dispatcher, consuming it.
    ///
    /// Queued tasks run before the workers exit.
    pub fn shutdown(self) -> DreplResult<()> {
        // Each worker thread observes a disconnected channel once the queue drains.
        drop(self.submitter);
        for thread in self.threads {
            thread.join().unwrap_or_else(|err| resume_unwind(err));
        }
        Ok(())
    }
}
