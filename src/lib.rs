//! Resilient request coordination: retries with backoff, single-flight
//! credential refresh on 401, cancellation by request identity and
//! priority-ordered batches.

pub mod config;
pub mod coordinator;
pub mod dispatcher;
mod errors;
pub mod fingerprint;
pub mod lane;
pub mod operation;
pub mod reauth;
pub mod registry;
pub mod request_context;
pub mod retry;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use config::{Config, RetryKind, RetrySettings};
pub use coordinator::{RequestCoordinator, RequestOptions};
pub use dispatcher::{ActionKind, DispatchHandle, Priority, PriorityAction, PriorityDispatcher};
pub use errors::Error;
pub use fingerprint::RequestFingerprint;
pub use reauth::{Credentials, ReAuthenticator, ReauthenticationGate};
pub use registry::{CancelHandle, CancellableTaskRegistry, TaskHandle};
pub use retry::{JitterStrategy, RetryOutcome, RetryPolicy};
pub use telemetry::metrics::{MetricEvent, MetricsSink, NoopMetrics};
pub use transport::{
    BuiltRequest, BytesDecoder, EmptyDecoder, HttpTransport, JsonDecoder, ResponseDecoder,
    TextDecoder, Transport, TransportError, TransportResponse,
};
pub use types::{CacheMode, Headers, HttpMethod, RequestBody, RequestDescriptor};

#[cfg(test)]
mod tests;
