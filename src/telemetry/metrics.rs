//! Observation hook for counters and timings. Sinks never influence control
//! flow; the coordinator ignores anything they do.

use std::time::Duration;

use crate::fingerprint::RequestFingerprint;

#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    AttemptStarted {
        request: RequestFingerprint,
        attempt: u32,
    },
    RetryScheduled {
        request: RequestFingerprint,
        attempt: u32,
        delay: Duration,
    },
    RefreshStarted,
    RefreshCompleted {
        success: bool,
        waiters: usize,
    },
    RequestCancelled {
        request: RequestFingerprint,
    },
    RequestCompleted {
        request: RequestFingerprint,
        attempts: u32,
        success: bool,
        elapsed: Duration,
    },
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, event: &MetricEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _event: &MetricEvent) {}
}
