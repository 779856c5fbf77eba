use std::io::Write;
use std::time::Duration;

use request_coordinator::{Config, Error, JitterStrategy, RetryKind, RetryPolicy};

#[test]
fn loads_retry_settings_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "base_url": "https://api.example.com/v1",
            "retry": {{ "kind": "exponential", "count": 3, "initial_delay_ms": 500, "jitter": "full" }},
            "serialize_reauth_requests": true,
            "default_headers": {{ "Accept": "application/json" }}
        }}"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.retry.kind, RetryKind::Exponential);
    assert_eq!(config.retry.jitter, JitterStrategy::Full);
    assert!(config.serialize_reauth_requests);
    assert_eq!(config.default_headers.get("Accept").map(String::as_str), Some("application/json"));

    let policy = config.retry.policy().unwrap();
    assert_eq!(policy.count(), 3);
    assert_eq!(policy.delay(2), Some(Duration::from_secs(1)));
    assert!(matches!(policy, RetryPolicy::Exponential { .. }));
}

#[test]
fn missing_or_malformed_file_is_a_config_error() {
    let err = Config::from_file("/definitely/not/here.json").unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    assert!(matches!(Config::from_file(file.path()), Err(Error::Config(_))));
}

#[test]
fn invalid_retry_settings_fail_validation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "base_url": "https://x", "retry": {{ "kind": "exponential", "count": 2, "multiplier": 0.5 }} }}"#
    )
    .unwrap();
    let config = Config::from_file(file.path()).unwrap();
    assert!(matches!(config.retry.policy(), Err(Error::Config(_))));
}
