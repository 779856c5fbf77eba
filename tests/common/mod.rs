#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use request_coordinator::{
    BuiltRequest, Config, Credentials, Error, ReAuthenticator, RequestCoordinator, RetrySettings,
    TaskHandle, Transport, TransportError, TransportResponse,
};

/// Transport that answers every request with 200 and the request path as
/// body, after a per-path delay. Logs `start <path>` / `end <path>`.
pub struct RecordingTransport {
    delays: Vec<(&'static str, Duration)>,
    hang: Vec<&'static str>,
    events: Mutex<Vec<String>>,
    cancels: Mutex<Vec<TaskHandle>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Self::with_delays(Vec::new())
    }

    pub fn with_delays(delays: Vec<(&'static str, Duration)>) -> Arc<Self> {
        Arc::new(Self {
            delays,
            hang: Vec::new(),
            events: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
        })
    }

    /// Requests to any of `paths` never complete on their own.
    pub fn hanging(paths: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            delays: Vec::new(),
            hang: paths,
            events: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("start ").map(str::to_string))
            .collect()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.lock().unwrap().len()
    }

    async fn exchange(&self, request: BuiltRequest) -> Result<TransportResponse, TransportError> {
        let path = request.url.path().to_string();
        self.events.lock().unwrap().push(format!("start {path}"));
        if self.hang.iter().any(|p| *p == path) {
            std::future::pending::<()>().await;
        }
        if let Some((_, delay)) = self.delays.iter().find(|(p, _)| *p == path) {
            tokio::time::sleep(*delay).await;
        }
        self.events.lock().unwrap().push(format!("end {path}"));
        Ok(TransportResponse::new(200, format!("\"{path}\"")))
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        request: BuiltRequest,
        _handle: TaskHandle,
    ) -> Result<TransportResponse, TransportError> {
        self.exchange(request).await
    }

    async fn upload(
        &self,
        request: BuiltRequest,
        _file: PathBuf,
        _handle: TaskHandle,
    ) -> Result<TransportResponse, TransportError> {
        self.exchange(request).await
    }

    async fn download(
        &self,
        request: BuiltRequest,
        _destination: PathBuf,
        _handle: TaskHandle,
    ) -> Result<TransportResponse, TransportError> {
        self.exchange(request).await
    }

    fn cancel(&self, handle: TaskHandle) {
        self.cancels.lock().unwrap().push(handle);
    }
}

/// Hands out `token-1`, `token-2`, ... immediately.
#[derive(Default)]
pub struct SequentialAuthenticator {
    issued: Mutex<u32>,
}

#[async_trait]
impl ReAuthenticator for SequentialAuthenticator {
    async fn refresh(&self) -> Result<Credentials, Error> {
        let mut issued = self.issued.lock().unwrap();
        *issued += 1;
        Ok(Credentials::bearer(format!("token-{}", *issued)))
    }
}

impl SequentialAuthenticator {
    pub fn issued(&self) -> u32 {
        *self.issued.lock().unwrap()
    }
}

pub fn coordinator(base_url: &str, transport: Arc<dyn Transport>) -> RequestCoordinator {
    RequestCoordinator::new(
        &Config::from_values(base_url, RetrySettings::default()),
        transport,
        Arc::new(SequentialAuthenticator::default()),
    )
    .expect("valid config")
}
