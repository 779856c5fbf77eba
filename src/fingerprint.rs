//! Stable identity of a logical request.
//!
//! Built from the method, the path and the query parameters sorted by key, so
//! the same request always maps to the same fingerprint regardless of the
//! iteration order of its query map.

use std::collections::HashMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::types::{HttpMethod, RequestDescriptor};

/// Upper bound on the readable prefix of a storage key.
const MAX_READABLE_LEN: usize = 96;
const DIGEST_PREFIX_LEN: usize = 16;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint {
    canonical: String,
    readable: String,
    digest: String,
}

impl RequestFingerprint {
    pub fn new(method: HttpMethod, path: &str, query: &HashMap<String, String>) -> Self {
        let mut params: Vec<(&String, &String)> = query.iter().collect();
        params.sort();

        // Percent-encoding keeps `&` and `=` inside keys or values from
        // aliasing a different parameter split.
        let encoded = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical = if encoded.is_empty() {
            format!("{} {}", method, path)
        } else {
            format!("{} {}?{}", method, path, encoded)
        };
        let digest = URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()));
        let readable = sanitize(&canonical);

        Self {
            canonical,
            readable,
            digest,
        }
    }

    pub fn of(descriptor: &RequestDescriptor) -> Self {
        Self::new(descriptor.method(), descriptor.path(), descriptor.query())
    }

    /// Canonical `METHOD path?sorted-query` form the identity is based on.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Human-readable form with path separators and other characters that are
    /// unsafe in file names replaced.
    pub fn readable(&self) -> &str {
        &self.readable
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Key suitable for external storage, e.g. a file name. The digest suffix
    /// keeps keys distinct when sanitizing or truncation merges readable forms.
    pub fn storage_key(&self) -> String {
        let readable: String = self.readable.chars().take(MAX_READABLE_LEN).collect();
        format!("{}-{}", readable, &self.digest[..DIGEST_PREFIX_LEN])
    }
}

impl fmt::Debug for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestFingerprint")
            .field(&self.canonical)
            .finish()
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' | '%' => out.push('_'),
            c if c.is_control() => out.push('_'),
            c => out.push(c),
        }
    }
    out
}
