//! `TaskExecutor`: the protocol-stage scheduler. Drops the
//! `spawn_dyn`/`CallContext` propagation pair some executor traits carry —
//! this crate has no cross-cutting cancellation
//! token to thread through every task.
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;

/// A unit of protocol-stage work. All `Exchange`/matcher/layer-timer state
/// mutation happens inside tasks submitted here.
pub trait TaskExecutor: Send + Sync {
    fn spawn(&self, task: Box<dyn FnOnce() + Send>);
}

enum Job {
    Task(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// Single background thread draining an unbounded queue, in order — the
/// default when no executor is injected ("if no executor
/// was injected, a single-threaded executor is created").
pub struct SingleThreadExecutor {
    sender: mpsc::Sender<Job>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SingleThreadExecutor {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = std::thread::spawn(move || {
            for job in receiver {
                match job {
                    Job::Task(task) => task(),
                    Job::Shutdown => break,
                }
            }
        });
        Self {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stops accepting new tasks and waits for the queue to drain. Called
    /// by `Endpoint::destroy` when this executor was not caller-supplied.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Job::Shutdown);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Default for SingleThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor for SingleThreadExecutor {
    fn spawn(&self, task: Box<dyn FnOnce() + Send>) {
        let _ = self.sender.send(Job::Task(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn tasks_run_in_submission_order() {
        let executor = SingleThreadExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let counter = counter.clone();
            let order = order.clone();
            executor.spawn(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                order.lock().unwrap().push(i);
            }));
        }

        executor.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
