use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::errors::Error;
use crate::operation::{Admission, Operation, OperationBody};

/// Sequential execution context: operations submitted to a lane run one at a
/// time, in submission order, on a drain task spawned onto the current tokio
/// runtime while the queue is non-empty.
pub struct SerialLane {
    name: &'static str,
    queue: Mutex<VecDeque<Arc<Operation>>>,
    draining: AtomicBool,
}

impl SerialLane {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queues `operation` behind everything already submitted.
    pub fn submit(self: &Arc<Self>, operation: Arc<Operation>) {
        let _ = operation.mark_ready();
        self.lock().push_back(operation);
        self.ensure_draining();
    }

    /// Runs `work` on the lane and resolves with its result.
    ///
    /// If the operation is invalidated before its turn, resolves with the
    /// invalidation reason without running `work`.
    pub async fn run<T, Fut>(self: &Arc<Self>, label: impl Into<String>, work: Fut) -> Result<T, Error>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (operation, rx) = Self::reporting_operation(label, work);
        self.submit(operation);
        rx.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Builds an operation whose outcome (or skip reason) is sent on the
    /// returned receiver.
    pub fn reporting_operation<T, Fut>(
        label: impl Into<String>,
        work: Fut,
    ) -> (Arc<Operation>, oneshot::Receiver<Result<T, Error>>)
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let body: OperationBody = Box::new(move |admission| {
            async move {
                let outcome = match admission {
                    Admission::Run => work.await,
                    Admission::Skip(reason) => Err(reason),
                };
                let _ = tx.send(outcome);
            }
            .boxed()
        });
        (Arc::new(Operation::new(label, body)), rx)
    }

    /// Marks every queued operation invalid so it finishes without running.
    /// Returns how many were invalidated.
    pub fn invalidate_pending(&self, reason: &Error) -> usize {
        let queue = self.lock();
        let count = queue
            .iter()
            .filter(|op| op.invalidate(reason.clone()))
            .count();
        if count > 0 {
            debug!(lane = self.name, count, reason = %reason, "lane.invalidate_pending");
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn ensure_draining(self: &Arc<Self>) {
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        let lane = Arc::clone(self);
        tokio::spawn(async move { lane.drain().await });
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.lock().pop_front();
            match next {
                Some(operation) => {
                    let run = AssertUnwindSafe(operation.start()).catch_unwind().await;
                    if run.is_err() {
                        error!(lane = self.name, operation = operation.id(), "lane.operation_panicked");
                    }
                }
                None => {
                    self.draining.store(false, Ordering::Release);
                    // A submit may have queued work after the pop above but
                    // before the flag was cleared; pick it up here.
                    let empty = self.lock().is_empty();
                    if empty || self.draining.swap(true, Ordering::AcqRel) {
                        return;
                    }
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<Operation>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
