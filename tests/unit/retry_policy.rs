use std::time::Duration;

use request_coordinator::RetryPolicy;

#[test]
fn should_retry_is_false_past_the_count() {
    let policies = [
        RetryPolicy::constant(3, Duration::from_millis(100)),
        RetryPolicy::exponential(3, Duration::from_millis(100), 2.0, Duration::from_secs(1))
            .unwrap(),
    ];
    for policy in policies {
        assert!((1..=3).all(|attempt| policy.should_retry(attempt)));
        assert!((4..50).all(|attempt| !policy.should_retry(attempt)));
        assert!(!policy.should_retry(u32::MAX));
    }
}

#[test]
fn disabled_never_retries() {
    let policy = RetryPolicy::Disabled;
    assert_eq!(policy.count(), 0);
    assert!(!policy.should_retry(1));
    assert_eq!(policy.delay(1), None);
}

#[test]
fn exponential_delay_is_capped() {
    let policy =
        RetryPolicy::exponential(10, Duration::from_millis(250), 3.0, Duration::from_secs(5))
            .unwrap();
    let delays: Vec<_> = (1..=5).map(|attempt| policy.delay(attempt).unwrap()).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(250),
            Duration::from_millis(750),
            Duration::from_millis(2250),
            Duration::from_secs(5),
            Duration::from_secs(5),
        ]
    );
    // Far past the cap the arithmetic must saturate, not overflow.
    assert_eq!(policy.delay(10), Some(Duration::from_secs(5)));
}

#[test]
fn constant_delay_does_not_grow() {
    let policy = RetryPolicy::constant(4, Duration::from_secs(2));
    assert!((1..=4).all(|attempt| policy.delay(attempt) == Some(Duration::from_secs(2))));
}

#[test]
fn invalid_exponential_parameters_are_rejected() {
    assert!(RetryPolicy::exponential(3, Duration::from_secs(1), 0.5, Duration::from_secs(5)).is_err());
    assert!(RetryPolicy::exponential(3, Duration::from_secs(1), f64::NAN, Duration::from_secs(5)).is_err());
    assert!(RetryPolicy::exponential(3, Duration::from_secs(10), 2.0, Duration::from_secs(5)).is_err());
}
