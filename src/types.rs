use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Header map; ordered so built requests and logs are deterministic.
pub type Headers = BTreeMap<String, String>;

/// Default per-attempt timeout applied when a descriptor does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body together with the encoding it is sent with.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Bytes(Vec<u8>),
}

/// Cache behaviour requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    #[default]
    Default,
    NoCache,
    NoStore,
    ForceCache,
}

impl CacheMode {
    /// `Cache-Control` directive a transport should send for this mode.
    pub fn cache_control(&self) -> Option<&'static str> {
        match self {
            CacheMode::Default => None,
            CacheMode::NoCache => Some("no-cache"),
            CacheMode::NoStore => Some("no-store"),
            CacheMode::ForceCache => Some("max-stale"),
        }
    }
}

/// Immutable description of one logical request.
///
/// Built once per call through the consuming `with_*` methods and never
/// changed afterwards; the coordinator may send it several times with
/// different headers.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    method: HttpMethod,
    path: String,
    query: HashMap<String, String>,
    headers: Headers,
    body: RequestBody,
    timeout: Duration,
    cache_mode: CacheMode,
    requires_reauthentication: bool,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: HashMap::new(),
            headers: Headers::new(),
            body: RequestBody::Empty,
            timeout: DEFAULT_TIMEOUT,
            cache_mode: CacheMode::Default,
            requires_reauthentication: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_query_map(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, crate::Error> {
        let value = serde_json::to_value(value)
            .map_err(|e| crate::Error::InvalidRequest(format!("body not serializable: {e}")))?;
        Ok(self.with_body(RequestBody::Json(value)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    /// Marks the request as authenticated: it carries the gate's credentials
    /// and may trigger one credential refresh when rejected with 401.
    pub fn requiring_reauthentication(mut self) -> Self {
        self.requires_reauthentication = true;
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    pub fn requires_reauthentication(&self) -> bool {
        self.requires_reauthentication
    }
}
