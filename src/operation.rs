//! Deferred, cancellable unit of work with an explicit lifecycle.
//!
//! An [`Operation`] does not know which scheduler runs it. A lane (or any
//! other executor) calls [`Operation::start`] when it is the operation's turn.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tracing::debug;

use crate::errors::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Waiting,
    Ready,
    Executing,
    Finished,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Finished | OperationState::Cancelled)
    }

    /// Only forward moves are legal; any live state may be cancelled.
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        match (self, next) {
            (Waiting, Ready) | (Ready, Executing) | (Executing, Finished) => true,
            // An operation that is skipped finishes straight from the queue.
            (Waiting | Ready, Finished) => true,
            (Waiting | Ready | Executing, Cancelled) => true,
            _ => false,
        }
    }
}

/// Illegal state change requested on an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: OperationState,
    pub to: OperationState,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal operation transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

/// What the body is told when the operation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Do the work.
    Run,
    /// The operation was invalidated or cancelled before it ran. The body
    /// must only report the reason to its owner, never perform the work.
    Skip(Error),
}

/// Body of an operation. Called exactly once, with [`Admission::Skip`] when
/// the operation will not run, so its owner always receives one outcome.
pub type OperationBody = Box<dyn FnOnce(Admission) -> BoxFuture<'static, ()> + Send>;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

struct Inner {
    state: OperationState,
    valid: bool,
    invalidation: Option<Error>,
    body: Option<OperationBody>,
}

pub struct Operation {
    id: u64,
    label: String,
    inner: Mutex<Inner>,
}

impl Operation {
    pub fn new(label: impl Into<String>, body: OperationBody) -> Self {
        Self {
            id: NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            inner: Mutex::new(Inner {
                state: OperationState::Waiting,
                valid: true,
                invalidation: None,
                body: Some(body),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> OperationState {
        self.lock().state
    }

    pub fn is_valid(&self) -> bool {
        self.lock().valid
    }

    pub fn mark_ready(&self) -> Result<(), TransitionError> {
        self.transition(OperationState::Ready)
    }

    /// Clears the `valid` flag. Once started, the operation finishes without
    /// running its body and hands `reason` to it instead. Has no effect on an
    /// operation that is already executing or terminal.
    pub fn invalidate(&self, reason: Error) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() || inner.state == OperationState::Executing {
            return false;
        }
        if inner.valid {
            inner.valid = false;
            inner.invalidation = Some(reason);
        }
        true
    }

    /// Moves a live operation to `Cancelled`. Cancelling an executing
    /// operation is cooperative: the body keeps running to completion. Repeat
    /// cancels are no-ops.
    pub fn cancel(&self) -> bool {
        self.transition(OperationState::Cancelled).is_ok()
    }

    /// Runs the operation if it is still live and valid.
    ///
    /// Calling `start` on a terminal operation is a no-op apart from making
    /// sure a cancelled body has reported its skip.
    pub async fn start(&self) {
        let (body, admission) = {
            let mut inner = self.lock();
            match inner.state {
                OperationState::Waiting | OperationState::Ready if inner.valid => {
                    inner.state = OperationState::Executing;
                    (inner.body.take(), Admission::Run)
                }
                OperationState::Waiting | OperationState::Ready => {
                    inner.state = OperationState::Finished;
                    let reason = inner.invalidation.clone().unwrap_or(Error::Cancelled);
                    (inner.body.take(), Admission::Skip(reason))
                }
                OperationState::Cancelled => (inner.body.take(), Admission::Skip(Error::Cancelled)),
                OperationState::Executing | OperationState::Finished => (None, Admission::Run),
            }
        };

        let Some(body) = body else {
            return;
        };
        debug!(operation = self.id, label = %self.label, admission = ?admission, "operation.start");
        body(admission.clone()).await;

        if admission == Admission::Run {
            // A cancel that arrived mid-flight leaves the state at Cancelled.
            let _ = self.transition(OperationState::Finished);
        }
    }

    fn transition(&self, next: OperationState) -> Result<(), TransitionError> {
        let mut inner = self.lock();
        if !inner.state.can_transition_to(next) {
            return Err(TransitionError {
                from: inner.state,
                to: next,
            });
        }
        inner.state = next;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &inner.state)
            .field("valid", &inner.valid)
            .finish()
    }
}
