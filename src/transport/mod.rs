//! Collaborator interfaces the coordinator drives: request assembly, the
//! transport itself and response decoding.

mod decode;
pub mod http;

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Url;

use crate::errors::Error;
use crate::registry::TaskHandle;
use crate::types::{CacheMode, Headers, HttpMethod, RequestBody, RequestDescriptor};

pub use decode::{BytesDecoder, EmptyDecoder, JsonDecoder, ResponseDecoder, TextDecoder};
pub use http::HttpTransport;

/// Fully assembled request, ready for a transport to send.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Headers,
    pub body: RequestBody,
    pub timeout: std::time::Duration,
    pub cache_mode: CacheMode,
}

impl BuiltRequest {
    /// Joins `descriptor`'s path onto `base_url`, appends its query (sorted by
    /// key) and attaches `headers` plus the cache directive.
    pub fn assemble(
        descriptor: &RequestDescriptor,
        base_url: &Url,
        headers: &Headers,
    ) -> Result<Self, Error> {
        let base = base_url.as_str().trim_end_matches('/');
        let path = descriptor.path().trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{path}")).map_err(|e| {
            Error::InvalidRequest(format!("cannot join '{}' onto {}: {e}", descriptor.path(), base_url))
        })?;

        if !descriptor.query().is_empty() {
            let mut params: Vec<_> = descriptor.query().iter().collect();
            params.sort();
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = headers.clone();
        if let Some(directive) = descriptor.cache_mode().cache_control() {
            headers
                .entry("Cache-Control".to_string())
                .or_insert_with(|| directive.to_string());
        }

        Ok(Self {
            method: descriptor.method(),
            url,
            headers,
            body: descriptor.body().clone(),
            timeout: descriptor.timeout(),
            cache_mode: descriptor.cache_mode(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw outcome of a transport exchange that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below HTTP: the exchange never produced a status code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network unavailable: {0}")]
    Unavailable(String),
    #[error("timed out")]
    TimedOut,
    #[error("{0}")]
    Io(String),
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn into_error(self, timeout: std::time::Duration) -> Error {
        match self {
            TransportError::Unavailable(msg) => Error::TransportUnavailable(msg),
            TransportError::TimedOut => Error::Timeout(timeout),
            TransportError::Io(msg) => Error::Transport(msg),
            TransportError::Cancelled => Error::Cancelled,
        }
    }
}

/// Platform transport underneath the coordinator.
///
/// Implementations must tolerate concurrent calls unless the coordinator is
/// configured with `serialize_reauth_requests`, in which case requests that
/// carry credentials are sent one at a time.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn build(
        &self,
        descriptor: &RequestDescriptor,
        base_url: &Url,
        headers: &Headers,
    ) -> Result<BuiltRequest, Error> {
        BuiltRequest::assemble(descriptor, base_url, headers)
    }

    async fn send(
        &self,
        request: BuiltRequest,
        handle: TaskHandle,
    ) -> Result<TransportResponse, TransportError>;

    async fn upload(
        &self,
        request: BuiltRequest,
        file: PathBuf,
        handle: TaskHandle,
    ) -> Result<TransportResponse, TransportError>;

    /// Streams the response body to `destination`. The returned response
    /// carries the status and an empty body.
    async fn download(
        &self,
        request: BuiltRequest,
        destination: PathBuf,
        handle: TaskHandle,
    ) -> Result<TransportResponse, TransportError>;

    /// Aborts the exchange started under `handle`, if still running.
    fn cancel(&self, handle: TaskHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_joins_path_and_sorts_query() {
        let descriptor = RequestDescriptor::get("/posts")
            .with_query("b", "2")
            .with_query("a", "1 2")
            .with_cache_mode(CacheMode::NoStore);
        let base = Url::parse("https://api.example.com/v1/").unwrap();
        let built = BuiltRequest::assemble(&descriptor, &base, &Headers::new()).unwrap();
        assert_eq!(built.url.as_str(), "https://api.example.com/v1/posts?a=1+2&b=2");
        assert_eq!(built.header("cache-control"), Some("no-store"));
    }

    #[test]
    fn transport_errors_map_to_taxonomy() {
        let timeout = std::time::Duration::from_secs(3);
        assert_eq!(
            TransportError::Unavailable("offline".into()).into_error(timeout),
            Error::TransportUnavailable("offline".into())
        );
        assert_eq!(TransportError::TimedOut.into_error(timeout), Error::Timeout(timeout));
        assert_eq!(TransportError::Cancelled.into_error(timeout), Error::Cancelled);
    }
}
