//! Batches of coordinator calls run one at a time, highest priority first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use jiff::Timestamp;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::coordinator::{RequestCoordinator, RequestOptions};
use crate::errors::Error;
use crate::operation::{Admission, Operation, OperationBody};
use crate::transport::{JsonDecoder, ResponseDecoder};
use crate::types::RequestDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Request,
    Upload,
    Download,
    Cancel,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Request => "request",
            ActionKind::Upload => "upload",
            ActionKind::Download => "download",
            ActionKind::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// One scheduled unit of a batch.
///
/// Ordered by priority, then by creation: `sequence` breaks ties so actions
/// added in the same clock tick keep their insertion order.
pub struct PriorityAction {
    priority: Priority,
    created_at: Timestamp,
    sequence: u64,
    kind: ActionKind,
    operation: Arc<Operation>,
}

impl PriorityAction {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        self.operation.label()
    }
}

impl PartialEq for PriorityAction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityAction {}

impl PartialOrd for PriorityAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityAction {
    // BinaryHeap pops the greatest element: higher priority wins, then the
    // earlier sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl fmt::Debug for PriorityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityAction")
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("kind", &self.kind)
            .field("label", &self.label())
            .finish()
    }
}

/// Builder-style batch of requests, uploads, downloads and cancels.
///
/// Actions run strictly one after another: the head action, including the
/// delivery of its own result callback, completes before the next starts.
pub struct PriorityDispatcher {
    coordinator: RequestCoordinator,
    actions: BinaryHeap<PriorityAction>,
    next_sequence: u64,
}

impl PriorityDispatcher {
    pub fn new(coordinator: RequestCoordinator) -> Self {
        Self {
            coordinator,
            actions: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Queues a request whose body is decoded as JSON.
    pub fn add_request<T, F>(self, descriptor: RequestDescriptor, priority: Priority, on_result: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.add_request_with(
            descriptor,
            RequestOptions::default(),
            priority,
            JsonDecoder::<T>::new(),
            on_result,
        )
    }

    pub fn add_request_with<D, F>(
        self,
        descriptor: RequestDescriptor,
        options: RequestOptions,
        priority: Priority,
        decoder: D,
        on_result: F,
    ) -> Self
    where
        D: ResponseDecoder,
        F: FnOnce(Result<D::Output, Error>) + Send + 'static,
    {
        let coordinator = self.coordinator.clone();
        let label = label(ActionKind::Request, &descriptor);
        let body: OperationBody = Box::new(move |admission| {
            async move {
                let result = match admission {
                    Admission::Run => coordinator.execute(&descriptor, options, decoder).await,
                    Admission::Skip(reason) => Err(reason),
                };
                coordinator.deliver(move || on_result(result)).await;
            }
            .boxed()
        });
        self.push(ActionKind::Request, priority, label, body)
    }

    pub fn add_upload<D, F>(
        self,
        descriptor: RequestDescriptor,
        file: impl Into<PathBuf>,
        priority: Priority,
        decoder: D,
        on_result: F,
    ) -> Self
    where
        D: ResponseDecoder,
        F: FnOnce(Result<D::Output, Error>) + Send + 'static,
    {
        let coordinator = self.coordinator.clone();
        let file = file.into();
        let label = label(ActionKind::Upload, &descriptor);
        let body: OperationBody = Box::new(move |admission| {
            async move {
                let result = match admission {
                    Admission::Run => {
                        coordinator
                            .upload(&descriptor, RequestOptions::default(), file, decoder)
                            .await
                    }
                    Admission::Skip(reason) => Err(reason),
                };
                coordinator.deliver(move || on_result(result)).await;
            }
            .boxed()
        });
        self.push(ActionKind::Upload, priority, label, body)
    }

    pub fn add_download<F>(
        self,
        descriptor: RequestDescriptor,
        destination: impl Into<PathBuf>,
        priority: Priority,
        on_result: F,
    ) -> Self
    where
        F: FnOnce(Result<PathBuf, Error>) + Send + 'static,
    {
        let coordinator = self.coordinator.clone();
        let destination = destination.into();
        let label = label(ActionKind::Download, &descriptor);
        let body: OperationBody = Box::new(move |admission| {
            async move {
                let result = match admission {
                    Admission::Run => {
                        coordinator
                            .download(&descriptor, RequestOptions::default(), destination)
                            .await
                    }
                    Admission::Skip(reason) => Err(reason),
                };
                coordinator.deliver(move || on_result(result)).await;
            }
            .boxed()
        });
        self.push(ActionKind::Download, priority, label, body)
    }

    /// Queues a cancel of every in-flight request matching `descriptor`.
    /// `on_result` receives whether anything was cancelled.
    pub fn add_cancel<F>(self, descriptor: RequestDescriptor, priority: Priority, on_result: F) -> Self
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let coordinator = self.coordinator.clone();
        let label = label(ActionKind::Cancel, &descriptor);
        let body: OperationBody = Box::new(move |admission| {
            async move {
                let cancelled = match admission {
                    Admission::Run => coordinator.cancel(&descriptor),
                    Admission::Skip(_) => false,
                };
                coordinator.deliver(move || on_result(cancelled)).await;
            }
            .boxed()
        });
        self.push(ActionKind::Cancel, priority, label, body)
    }

    /// Drains the batch on the current task.
    pub async fn run(mut self) {
        let total = self.actions.len();
        info!(actions = total, "dispatch.start");
        while let Some(action) = self.actions.pop() {
            debug!(
                priority = ?action.priority,
                sequence = action.sequence,
                kind = %action.kind,
                label = action.label(),
                created_at = %action.created_at,
                "dispatch.action"
            );
            action.operation.start().await;
        }
        info!(actions = total, "dispatch.complete");
    }

    /// Drains the batch on the runtime and calls `on_all_complete` exactly
    /// once, on the observation lane, after the last action has reported.
    pub fn execute(self, on_all_complete: impl FnOnce() + Send + 'static) -> DispatchHandle {
        let operations = self
            .actions
            .iter()
            .map(|action| Arc::clone(&action.operation))
            .collect();
        let coordinator = self.coordinator.clone();
        let task = tokio::spawn(async move {
            self.run().await;
            coordinator.deliver(on_all_complete).await;
        });
        DispatchHandle { operations, task }
    }

    fn push(mut self, kind: ActionKind, priority: Priority, label: String, body: OperationBody) -> Self {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.actions.push(PriorityAction {
            priority,
            created_at: Timestamp::now(),
            sequence,
            kind,
            operation: Arc::new(Operation::new(label, body)),
        });
        self
    }
}

fn label(kind: ActionKind, descriptor: &RequestDescriptor) -> String {
    format!("{kind} {} {}", descriptor.method(), descriptor.path())
}

/// Handle to a batch started with [`PriorityDispatcher::execute`].
pub struct DispatchHandle {
    operations: Vec<Arc<Operation>>,
    task: JoinHandle<()>,
}

impl DispatchHandle {
    /// Invalidates every action that has not started yet. Those report
    /// `Err(Error::Cancelled)` (cancel actions report `false`) without
    /// running. The action currently running is unaffected. Returns how
    /// many actions were invalidated.
    pub fn cancel(&self) -> usize {
        let count = self
            .operations
            .iter()
            .filter(|operation| operation.invalidate(Error::Cancelled))
            .count();
        info!(invalidated = count, "dispatch.cancel");
        count
    }

    /// Waits until the batch has drained and the completion has run.
    pub async fn finished(self) {
        if let Err(join_err) = self.task.await {
            error!(error = %join_err, "dispatch task failed");
        }
    }
}
