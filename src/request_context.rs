use std::sync::Arc;
use std::time::Duration;

use rand::{SeedableRng, rngs::StdRng};
use reqwest::Url;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::errors::Error;
use crate::lane::SerialLane;
use crate::reauth::{ReAuthenticator, ReauthenticationGate};
use crate::registry::CancellableTaskRegistry;
use crate::retry::{JitterStrategy, RetryPolicy};
use crate::telemetry::metrics::{MetricsSink, NoopMetrics};
use crate::transport::Transport;
use crate::types::Headers;

/// Shared state behind every request a coordinator runs, ensuring consistent
/// retry, credential and cancellation handling.
pub struct RequestContext {
    transport: Arc<dyn Transport>,
    base_url: Url,
    default_headers: Headers,
    default_retry: RetryPolicy,
    jitter: JitterStrategy,
    credential_skew: Duration,
    registry: CancellableTaskRegistry,
    gate: Arc<ReauthenticationGate>,
    reauth_lane: Option<Arc<SerialLane>>,
    observation: Arc<SerialLane>,
    metrics: Arc<dyn MetricsSink>,
    rng: Mutex<StdRng>,
}

impl RequestContext {
    pub fn build(
        config: &Config,
        transport: Arc<dyn Transport>,
        authenticator: Arc<dyn ReAuthenticator>,
        metrics: Option<Arc<dyn MetricsSink>>,
    ) -> Result<Self, Error> {
        let base_url = config.base_url()?;
        let default_retry = config.retry.policy()?;
        let metrics = metrics.unwrap_or_else(|| Arc::new(NoopMetrics));

        let reauth_lane = config
            .serialize_reauth_requests
            .then(|| SerialLane::new("reauth"));

        let mut gate = ReauthenticationGate::new(authenticator).with_metrics(Arc::clone(&metrics));
        if let Some(lane) = &reauth_lane {
            // Requests still queued behind a failed refresh would only be
            // rejected again; finish them with the refresh error instead.
            let lane = Arc::clone(lane);
            gate = gate.with_failure_hook(Box::new(move |err: &Error| {
                lane.invalidate_pending(err);
            }));
        }

        Ok(Self {
            transport,
            base_url,
            default_headers: config.default_headers.clone(),
            default_retry,
            jitter: config.retry.jitter,
            credential_skew: config.credential_skew(),
            registry: CancellableTaskRegistry::new(),
            gate: Arc::new(gate),
            reauth_lane,
            observation: SerialLane::new("observation"),
            metrics,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn default_headers(&self) -> &Headers {
        &self.default_headers
    }

    pub fn default_retry(&self) -> &RetryPolicy {
        &self.default_retry
    }

    pub fn credential_skew(&self) -> Duration {
        self.credential_skew
    }

    pub fn registry(&self) -> &CancellableTaskRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &Arc<ReauthenticationGate> {
        &self.gate
    }

    /// Lane for re-auth requests, present only when the transport must not
    /// see concurrent authenticated traffic.
    pub fn reauth_lane(&self) -> Option<&Arc<SerialLane>> {
        self.reauth_lane.as_ref()
    }

    /// Lane result callbacks are delivered on.
    pub fn observation(&self) -> &Arc<SerialLane> {
        &self.observation
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Delay before retry number `attempt`, with the configured jitter.
    pub async fn retry_delay(&self, policy: &RetryPolicy, attempt: u32) -> Option<Duration> {
        let delay = policy.delay(attempt)?;
        let mut rng = self.rng.lock().await;
        Some(self.jitter.apply(delay, policy.max_delay(), &mut *rng))
    }
}
