use tracing::{Level, event};
use uuid::Uuid;

use crate::errors::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success,
    Failed,
}

/// Structured events for one credential refresh cycle. Every request that
/// joins the cycle is logged against the same `cycle_id`.
#[derive(Clone, Debug)]
pub struct RefreshTelemetry {
    cycle_id: Uuid,
    context: String,
}

impl RefreshTelemetry {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            context: context.into(),
        }
    }

    pub fn cycle_id(&self) -> Uuid {
        self.cycle_id
    }

    pub fn emit_start(&self) {
        event!(
            Level::INFO,
            cycle_id = %self.cycle_id,
            context = %self.context,
            timestamp = %jiff::Timestamp::now(),
            "refresh.start"
        );
    }

    pub fn emit_joined(&self, waiters: usize) {
        event!(
            Level::DEBUG,
            cycle_id = %self.cycle_id,
            context = %self.context,
            waiters,
            "refresh.joined"
        );
    }

    pub fn emit_success(&self, waiters: usize) {
        event!(
            Level::INFO,
            cycle_id = %self.cycle_id,
            context = %self.context,
            timestamp = %jiff::Timestamp::now(),
            outcome = ?RefreshOutcome::Success,
            waiters,
            "refresh.success"
        );
    }

    pub fn emit_failure(&self, error: &Error, waiters: usize) {
        event!(
            Level::ERROR,
            cycle_id = %self.cycle_id,
            context = %self.context,
            timestamp = %jiff::Timestamp::now(),
            outcome = ?RefreshOutcome::Failed,
            waiters,
            error = %error,
            "refresh.failure"
        );
    }
}
