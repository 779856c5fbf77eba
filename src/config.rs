//! Coordinator configuration, read from a JSON file or the environment.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::errors::Error;
use crate::retry::{JitterStrategy, RetryPolicy};
use crate::transport::http::DEFAULT_USER_AGENT;

const ENV_PREFIX: &str = "REQUEST_COORDINATOR_";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    #[default]
    Disabled,
    Constant,
    Exponential,
}

/// Default retry behaviour for requests that do not pass their own policy.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub kind: RetryKind,
    pub count: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: JitterStrategy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            kind: RetryKind::Disabled,
            count: 0,
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> Result<RetryPolicy, Error> {
        let initial = Duration::from_millis(self.initial_delay_ms);
        match self.kind {
            RetryKind::Disabled => Ok(RetryPolicy::Disabled),
            RetryKind::Constant => Ok(RetryPolicy::constant(self.count, initial)),
            RetryKind::Exponential => RetryPolicy::exponential(
                self.count,
                initial,
                self.multiplier,
                Duration::from_millis(self.max_delay_ms),
            ),
        }
    }
}

/// Immutable coordinator configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Config {
    pub base_url: String,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Send requests that carry credentials one at a time. Only needed when
    /// the transport cannot handle concurrent authenticated traffic.
    #[serde(default)]
    pub serialize_reauth_requests: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    /// Credentials this close to expiry are refreshed before sending.
    #[serde(default = "default_credential_skew_secs")]
    pub credential_skew_secs: u64,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_credential_skew_secs() -> u64 {
    30
}

impl Config {
    pub fn from_values(base_url: impl Into<String>, retry: RetrySettings) -> Self {
        Self {
            base_url: base_url.into(),
            retry,
            serialize_reauth_requests: false,
            user_agent: default_user_agent(),
            default_headers: BTreeMap::new(),
            credential_skew_secs: default_credential_skew_secs(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("Invalid config {}: {e}", path.display())))
    }

    /// Reads `REQUEST_COORDINATOR_*` environment variables.
    /// # ENV Vars
    /// * `REQUEST_COORDINATOR_BASE_URL` - required
    /// * `REQUEST_COORDINATOR_RETRY_KIND` - `disabled`, `constant` or `exponential`
    /// * `REQUEST_COORDINATOR_RETRY_COUNT`, `..._RETRY_INITIAL_DELAY_MS`,
    ///   `..._RETRY_MULTIPLIER`, `..._RETRY_MAX_DELAY_MS`, `..._RETRY_JITTER`
    /// * `REQUEST_COORDINATOR_SERIALIZE_REAUTH` - `true`/`false`
    /// * `REQUEST_COORDINATOR_USER_AGENT`
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let base_url = var("BASE_URL").ok_or_else(|| {
            Error::Config(format!("Missing {ENV_PREFIX}BASE_URL env var"))
        })?;

        let mut retry = RetrySettings::default();
        if let Some(kind) = var("RETRY_KIND") {
            retry.kind = match kind.to_lowercase().as_str() {
                "disabled" => RetryKind::Disabled,
                "constant" => RetryKind::Constant,
                "exponential" => RetryKind::Exponential,
                other => {
                    return Err(Error::Config(format!("Unknown retry kind '{other}'")));
                }
            };
        }
        if let Some(v) = var("RETRY_COUNT") {
            retry.count = parse("RETRY_COUNT", &v)?;
        }
        if let Some(v) = var("RETRY_INITIAL_DELAY_MS") {
            retry.initial_delay_ms = parse("RETRY_INITIAL_DELAY_MS", &v)?;
        }
        if let Some(v) = var("RETRY_MULTIPLIER") {
            retry.multiplier = parse("RETRY_MULTIPLIER", &v)?;
        }
        if let Some(v) = var("RETRY_MAX_DELAY_MS") {
            retry.max_delay_ms = parse("RETRY_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = var("RETRY_JITTER") {
            retry.jitter = v.parse()?;
        }

        let mut config = Self::from_values(base_url, retry);
        if let Some(v) = var("SERIALIZE_REAUTH") {
            config.serialize_reauth_requests = parse("SERIALIZE_REAUTH", &v)?;
        }
        if let Some(v) = var("USER_AGENT") {
            config.user_agent = v;
        }
        Ok(config)
    }

    /// Parses `base_url`, adding `https://` when no scheme is given.
    pub fn base_url(&self) -> Result<Url, Error> {
        let raw = if self.base_url.contains("://") {
            self.base_url.clone()
        } else {
            format!("https://{}", self.base_url)
        };
        Url::parse(&raw).map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", raw, e)))
    }

    pub fn credential_skew(&self) -> Duration {
        Duration::from_secs(self.credential_skew_secs)
    }
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, Error>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {ENV_PREFIX}{name} '{raw}': {e}")))
}
