use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::types::Headers;

pub const AUTHORIZATION: &str = "Authorization";

fn default_scheme() -> String {
    "Bearer".to_string()
}

/// Credentials produced by a refresh exchange, applied to authenticated
/// requests as the `Authorization` header.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    value: String,
    #[serde(default = "default_scheme")]
    scheme: String,
    issued_at: Timestamp,
    #[serde(default)]
    expires_at: Option<Timestamp>,
}

impl Credentials {
    /// Bearer credentials issued now, with no known expiry.
    pub fn bearer(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            scheme: default_scheme(),
            issued_at: Timestamp::now(),
            expires_at: None,
        }
    }

    pub fn try_new(
        value: impl Into<String>,
        scheme: impl Into<String>,
        issued_at: Timestamp,
        expires_at: Option<Timestamp>,
    ) -> Result<Self, Error> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::Config("Credential value must not be empty".into()));
        }
        if let Some(expires_at) = expires_at
            && expires_at <= issued_at
        {
            return Err(Error::Config(
                "Credentials expire before or at issuance".into(),
            ));
        }
        Ok(Self {
            value,
            scheme: scheme.into(),
            issued_at,
            expires_at,
        })
    }

    /// Bearer credentials valid for `ttl` from now.
    pub fn bearer_with_ttl(value: impl Into<String>, ttl: Duration) -> Result<Self, Error> {
        let issued_at = Timestamp::now();
        let ttl = SignedDuration::try_from(ttl)
            .map_err(|e| Error::Config(format!("Credential TTL out of range: {e}")))?;
        let expires_at = issued_at
            .checked_add(ttl)
            .map_err(|e| Error::Config(format!("Credential expiry out of range: {e}")))?;
        Self::try_new(value, default_scheme(), issued_at, Some(expires_at))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn issued_at(&self) -> Timestamp {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// Whether the credentials are expired at `now`, treating anything
    /// within `skew` of the expiry as already expired.
    pub fn is_expired(&self, now: Timestamp, skew: Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let skew = SignedDuration::try_from(skew).unwrap_or(SignedDuration::MAX);
        match now.checked_add(skew) {
            Ok(horizon) => horizon >= expires_at,
            Err(_) => true,
        }
    }

    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.scheme, self.value)
    }

    /// Sets the `Authorization` header, replacing any value supplied by the
    /// caller (whatever its casing).
    pub fn apply(&self, headers: &mut Headers) {
        headers.retain(|name, _| !name.eq_ignore_ascii_case(AUTHORIZATION));
        headers.insert(AUTHORIZATION.to_string(), self.authorization_value());
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("value", &"<redacted>")
            .field("scheme", &self.scheme)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
