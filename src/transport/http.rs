use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use reqwest::{Client, Method};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::registry::TaskHandle;
use crate::types::{Headers, HttpMethod, RequestBody};

use super::{BuiltRequest, Transport, TransportError, TransportResponse};

pub const DEFAULT_USER_AGENT: &str = concat!("request-coordinator/", env!("CARGO_PKG_VERSION"));

/// [`Transport`] backed by a shared `reqwest::Client`.
///
/// Each exchange runs in its own task so [`Transport::cancel`] can abort it
/// by handle.
pub struct HttpTransport {
    client: Client,
    user_agent: String,
    in_flight: Mutex<HashMap<TaskHandle, AbortHandle>>,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self::with_user_agent(client, DEFAULT_USER_AGENT)
    }

    /// Transport with a default client and the configured user agent.
    pub fn from_config(config: &Config) -> Self {
        Self::with_user_agent(Client::new(), config.user_agent.clone())
    }

    pub fn with_user_agent(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn request(&self, built: &BuiltRequest, body: Option<Vec<u8>>) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method(built.method), built.url.clone())
            .timeout(built.timeout)
            .header("User-Agent", self.user_agent.as_str());
        for (name, value) in &built.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(bytes) = body {
            return builder.body(bytes);
        }
        match &built.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(pairs) => builder
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(encode_form(pairs)),
            RequestBody::Bytes(bytes) => builder.body(bytes.clone()),
        }
    }

    /// Runs `exchange` as an abortable task registered under `handle`.
    async fn run<F>(&self, handle: TaskHandle, exchange: F) -> Result<TransportResponse, TransportError>
    where
        F: std::future::Future<Output = Result<TransportResponse, TransportError>> + Send + 'static,
    {
        let task = tokio::spawn(exchange);
        self.lock().insert(handle, task.abort_handle());
        let _entry = InFlightEntry {
            transport: self,
            handle,
        };
        match task.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => Err(TransportError::Cancelled),
            Err(join_err) => Err(TransportError::Io(format!("transport task failed: {join_err}"))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskHandle, AbortHandle>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unregisters an exchange however its caller stops waiting. An exchange
/// whose caller went away is aborted with it.
struct InFlightEntry<'a> {
    transport: &'a HttpTransport,
    handle: TaskHandle,
}

impl Drop for InFlightEntry<'_> {
    fn drop(&mut self) {
        if let Some(task) = self.transport.lock().remove(&self.handle) {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: BuiltRequest,
        handle: TaskHandle,
    ) -> Result<TransportResponse, TransportError> {
        let builder = self.request(&request, None);
        self.run(handle, async move {
            let resp = builder.send().await.map_err(map_reqwest)?;
            read_response(resp).await
        })
        .await
    }

    async fn upload(
        &self,
        request: BuiltRequest,
        file: PathBuf,
        handle: TaskHandle,
    ) -> Result<TransportResponse, TransportError> {
        let bytes = tokio::fs::read(&file)
            .await
            .map_err(|e| TransportError::Io(format!("cannot read {}: {e}", file.display())))?;
        info!("upload: url='{}' bytes={}", request.url, bytes.len());
        let builder = self.request(&request, Some(bytes));
        self.run(handle, async move {
            let resp = builder.send().await.map_err(map_reqwest)?;
            read_response(resp).await
        })
        .await
    }

    async fn download(
        &self,
        request: BuiltRequest,
        destination: PathBuf,
        handle: TaskHandle,
    ) -> Result<TransportResponse, TransportError> {
        let builder = self.request(&request, None);
        self.run(handle, async move {
            let resp = builder.send().await.map_err(map_reqwest)?;
            let mut response = read_response(resp).await?;
            if response.is_success() {
                tokio::fs::write(&destination, &response.body).await.map_err(|e| {
                    TransportError::Io(format!("cannot write {}: {e}", destination.display()))
                })?;
                info!(
                    "download complete: path='{}' bytes={}",
                    destination.display(),
                    response.body.len()
                );
                response.body.clear();
            }
            Ok(response)
        })
        .await
    }

    fn cancel(&self, handle: TaskHandle) {
        let task = self.lock().remove(&handle);
        if let Some(task) = task {
            debug!(task = %handle, "transport.cancel");
            task.abort();
        }
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
    }
}

fn encode_form(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::TimedOut
    } else if err.is_connect() {
        TransportError::Unavailable(err.to_string())
    } else {
        TransportError::Io(err.to_string())
    }
}

async fn read_response(resp: reqwest::Response) -> Result<TransportResponse, TransportError> {
    let status = resp.status().as_u16();
    let headers: Headers = resp
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = resp.bytes().await.map_err(map_reqwest)?;
    Ok(TransportResponse {
        status,
        headers,
        body: body.to_vec(),
    })
}
