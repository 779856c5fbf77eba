use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::Error;
use crate::fingerprint::RequestFingerprint;
use crate::lane::SerialLane;
use crate::operation::Operation;
use crate::reauth::{Credentials, ReAuthenticator, ReauthenticationGate};
use crate::registry::{CancelHandle, TaskHandle};
use crate::request_context::RequestContext;
use crate::retry::{RetryOutcome, RetryPolicy, millis};
use crate::telemetry::metrics::{MetricEvent, MetricsSink};
use crate::transport::{JsonDecoder, ResponseDecoder, Transport, TransportResponse};
use crate::types::{Headers, RequestDescriptor};

/// Per-call settings layered over the descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: Headers,
    /// Overrides the configured default policy for this call.
    pub retry: Option<RetryPolicy>,
}

impl RequestOptions {
    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self {
            headers: Headers::new(),
            retry: Some(retry),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
enum Exchange {
    Send,
    Upload(PathBuf),
    Download(PathBuf),
}

/// Runs logical requests: retries them per policy, routes 401s through the
/// re-authentication gate and keeps them cancellable by descriptor.
#[derive(Clone)]
pub struct RequestCoordinator {
    context: Arc<RequestContext>,
}

impl RequestCoordinator {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        authenticator: Arc<dyn ReAuthenticator>,
    ) -> Result<Self, Error> {
        let context = RequestContext::build(config, transport, authenticator, None)?;
        Ok(Self::from_context(Arc::new(context)))
    }

    pub fn with_metrics(
        config: &Config,
        transport: Arc<dyn Transport>,
        authenticator: Arc<dyn ReAuthenticator>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, Error> {
        let context = RequestContext::build(config, transport, authenticator, Some(metrics))?;
        Ok(Self::from_context(Arc::new(context)))
    }

    pub fn from_context(context: Arc<RequestContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<RequestContext> {
        &self.context
    }

    pub fn gate(&self) -> &Arc<ReauthenticationGate> {
        self.context.gate()
    }

    /// Installs credentials obtained before the first request.
    pub fn seed_credentials(&self, credentials: Credentials) {
        self.context.gate().seed(credentials);
    }

    /// Executes `descriptor` and decodes the successful response.
    pub async fn execute<D: ResponseDecoder>(
        &self,
        descriptor: &RequestDescriptor,
        options: RequestOptions,
        decoder: D,
    ) -> Result<D::Output, Error> {
        let response = self
            .perform(descriptor.clone(), options, Exchange::Send)
            .await?;
        decode(descriptor, &decoder, &response)
    }

    pub async fn execute_json<T: DeserializeOwned + Send + 'static>(
        &self,
        descriptor: &RequestDescriptor,
        options: RequestOptions,
    ) -> Result<T, Error> {
        self.execute(descriptor, options, JsonDecoder::new()).await
    }

    pub async fn upload<D: ResponseDecoder>(
        &self,
        descriptor: &RequestDescriptor,
        options: RequestOptions,
        file: impl Into<PathBuf>,
        decoder: D,
    ) -> Result<D::Output, Error> {
        let response = self
            .perform(descriptor.clone(), options, Exchange::Upload(file.into()))
            .await?;
        decode(descriptor, &decoder, &response)
    }

    /// Downloads the response body to `destination` and returns its path.
    pub async fn download(
        &self,
        descriptor: &RequestDescriptor,
        options: RequestOptions,
        destination: impl Into<PathBuf>,
    ) -> Result<PathBuf, Error> {
        let destination = destination.into();
        self.perform(
            descriptor.clone(),
            options,
            Exchange::Download(destination.clone()),
        )
        .await?;
        Ok(destination)
    }

    /// Callback form of [`RequestCoordinator::execute`]. The request runs on
    /// the runtime; `on_result` is called exactly once, on the observation
    /// lane.
    pub fn submit<D, F>(
        &self,
        descriptor: RequestDescriptor,
        options: RequestOptions,
        decoder: D,
        on_result: F,
    ) -> JoinHandle<()>
    where
        D: ResponseDecoder,
        F: FnOnce(Result<D::Output, Error>) + Send + 'static,
    {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let result = coordinator.execute(&descriptor, options, decoder).await;
            coordinator.deliver(move || on_result(result)).await;
        })
    }

    /// Cancels every in-flight request matching `descriptor`'s fingerprint.
    /// Returns false if none was running. Safe to call repeatedly.
    pub fn cancel(&self, descriptor: &RequestDescriptor) -> bool {
        let fingerprint = RequestFingerprint::of(descriptor);
        let cancelled = self.context.registry().cancel(&fingerprint);
        if cancelled {
            info!(request = %fingerprint, "request.cancel");
            self.context
                .metrics()
                .record(&MetricEvent::RequestCancelled {
                    request: fingerprint,
                });
        }
        cancelled
    }

    /// Runs `callback` on the observation lane and waits until it has run.
    pub(crate) async fn deliver(&self, callback: impl FnOnce() + Send + 'static) {
        let delivered = self
            .context
            .observation()
            .run("deliver", async move {
                callback();
                Ok::<_, Error>(())
            })
            .await;
        if let Err(err) = delivered {
            error!(error = %err, "observation.delivery_failed");
        }
    }

    async fn perform(
        &self,
        descriptor: RequestDescriptor,
        options: RequestOptions,
        exchange: Exchange,
    ) -> Result<TransportResponse, Error> {
        let fingerprint = RequestFingerprint::of(&descriptor);
        let token = CancellationToken::new();
        let registry = self.context.registry();
        let task = registry.next_handle();
        registry.register(
            fingerprint.clone(),
            CancelHandle::new(task, {
                let token = token.clone();
                move || token.cancel()
            }),
        );
        let _registration = Registration {
            context: Arc::clone(&self.context),
            fingerprint: fingerprint.clone(),
            task,
        };

        let policy = options
            .retry
            .unwrap_or_else(|| self.context.default_retry().clone());
        let run = RequestRun {
            context: Arc::clone(&self.context),
            descriptor,
            extra_headers: options.headers,
            policy,
            exchange,
            fingerprint,
            token: token.clone(),
        };

        match self.context.reauth_lane() {
            Some(lane) if run.descriptor.requires_reauthentication() => {
                let label = run.fingerprint.to_string();
                let (operation, outcome) = SerialLane::reporting_operation(label, run.run());
                lane.submit(Arc::clone(&operation));
                let abandoned = AbandonGuard {
                    operation: Arc::clone(&operation),
                    token: token.clone(),
                    armed: true,
                };
                let result = tokio::select! {
                    outcome = outcome => outcome.unwrap_or(Err(Error::Cancelled)),
                    _ = token.cancelled() => {
                        // Still queued: it will be skipped. Already running:
                        // the attempt loop sees the same token.
                        operation.cancel();
                        Err(Error::Cancelled)
                    }
                };
                abandoned.disarm();
                result
            }
            _ => run.run().await,
        }
    }
}

/// Keeps a logical request registered for cancellation until it reaches a
/// terminal result, whichever path gets it there.
struct Registration {
    context: Arc<RequestContext>,
    fingerprint: RequestFingerprint,
    task: TaskHandle,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.context
            .registry()
            .release(&self.fingerprint, self.task);
    }
}

/// Cancels a lane-queued request whose caller stopped waiting before the
/// outcome arrived, so the lane never runs it for nobody.
struct AbandonGuard {
    operation: Arc<Operation>,
    token: CancellationToken,
    armed: bool,
}

impl AbandonGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
            if self.operation.cancel() {
                debug!(
                    operation = self.operation.id(),
                    label = self.operation.label(),
                    "operation.abandoned"
                );
            }
        }
    }
}

/// State of one logical request across its attempts.
struct RequestRun {
    context: Arc<RequestContext>,
    descriptor: RequestDescriptor,
    extra_headers: Headers,
    policy: RetryPolicy,
    exchange: Exchange,
    fingerprint: RequestFingerprint,
    token: CancellationToken,
}

impl RequestRun {
    async fn run(self) -> Result<TransportResponse, Error> {
        let start = Instant::now();
        let mut attempts: u32 = 0;
        let mut failures: u32 = 0;
        let mut total_delay = Duration::ZERO;
        let mut allow_reauth = self.descriptor.requires_reauthentication();
        let mut reauthenticated = false;

        let result = loop {
            if self.token.is_cancelled() {
                break Err(Error::Cancelled);
            }

            let (credentials, generation) = self.context.gate().snapshot();
            if allow_reauth
                && let Some(current) = &credentials
                && current.is_expired(jiff::Timestamp::now(), self.context.credential_skew())
            {
                info!(request = %self.fingerprint, "credentials expired; refreshing before send");
                allow_reauth = false;
                reauthenticated = true;
                match self.reauthenticate(generation).await {
                    Ok(_) => continue,
                    Err(err) => break Err(err),
                }
            }

            attempts += 1;
            self.context.metrics().record(&MetricEvent::AttemptStarted {
                request: self.fingerprint.clone(),
                attempt: attempts,
            });

            match self.attempt(credentials.as_ref()).await {
                Ok(response) => break Ok(response),
                Err(Error::Unauthorized) if allow_reauth => {
                    warn!(
                        request = %self.fingerprint,
                        attempt = attempts,
                        "unauthorized (401); re-authenticating"
                    );
                    allow_reauth = false;
                    reauthenticated = true;
                    if let Err(err) = self.reauthenticate(generation).await {
                        break Err(err);
                    }
                }
                Err(err) if err.is_retryable() && self.policy.should_retry(failures + 1) => {
                    failures += 1;
                    let delay = self
                        .context
                        .retry_delay(&self.policy, failures)
                        .await
                        .unwrap_or_default();
                    warn!(
                        request = %self.fingerprint,
                        attempt = attempts,
                        retry = failures,
                        max_retries = self.policy.count(),
                        delay_ms = millis(delay),
                        error = %err,
                        "retry.scheduling"
                    );
                    self.context.metrics().record(&MetricEvent::RetryScheduled {
                        request: self.fingerprint.clone(),
                        attempt: failures,
                        delay,
                    });
                    total_delay += delay;
                    tokio::select! {
                        _ = self.token.cancelled() => break Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => break Err(err),
            }
        };

        RetryOutcome {
            fingerprint: self.fingerprint.clone(),
            attempts,
            reauthenticated,
            success: result.is_ok(),
            total_delay,
        }
        .log();
        self.context.metrics().record(&MetricEvent::RequestCompleted {
            request: self.fingerprint.clone(),
            attempts,
            success: result.is_ok(),
            elapsed: start.elapsed(),
        });
        result
    }

    /// One transport exchange, raced against cancellation and the
    /// descriptor's timeout.
    async fn attempt(&self, credentials: Option<&Credentials>) -> Result<TransportResponse, Error> {
        let transport = self.context.transport();
        let headers = self.headers(credentials);
        let built = transport.build(&self.descriptor, self.context.base_url(), &headers)?;
        let handle = self.context.registry().next_handle();
        let timeout = self.descriptor.timeout();

        let exchange = match &self.exchange {
            Exchange::Send => transport.send(built, handle),
            Exchange::Upload(file) => transport.upload(built, file.clone(), handle),
            Exchange::Download(destination) => transport.download(built, destination.clone(), handle),
        };

        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                transport.cancel(handle);
                return Err(Error::Cancelled);
            }
            outcome = tokio::time::timeout(timeout, exchange) => outcome,
        };

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(err.into_error(timeout)),
            Err(_elapsed) => {
                transport.cancel(handle);
                return Err(Error::Timeout(timeout));
            }
        };

        if response.is_success() {
            Ok(response)
        } else {
            Err(Error::from_status(response.status))
        }
    }

    async fn reauthenticate(&self, generation: u64) -> Result<Credentials, Error> {
        tokio::select! {
            _ = self.token.cancelled() => Err(Error::Cancelled),
            refreshed = self.context.gate().reauthenticate(generation) => refreshed,
        }
    }

    /// Configured defaults, then descriptor headers, then per-call headers;
    /// credentials override any caller `Authorization` on re-auth requests.
    fn headers(&self, credentials: Option<&Credentials>) -> Headers {
        let mut headers = self.context.default_headers().clone();
        headers.extend(self.descriptor.headers().clone());
        headers.extend(self.extra_headers.clone());
        if self.descriptor.requires_reauthentication()
            && let Some(credentials) = credentials
        {
            credentials.apply(&mut headers);
        }
        headers
    }
}

fn decode<D: ResponseDecoder>(
    descriptor: &RequestDescriptor,
    decoder: &D,
    response: &TransportResponse,
) -> Result<D::Output, Error> {
    decoder.decode(response).inspect_err(|err| {
        error!(
            "decode failed: method={} path='{}' status={} error={}",
            descriptor.method(),
            descriptor.path(),
            response.status,
            err
        );
    })
}
