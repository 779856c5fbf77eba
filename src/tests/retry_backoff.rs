use std::time::Duration;

use crate::coordinator::RequestOptions;
use crate::errors::Error;
use crate::retry::RetryPolicy;
use crate::tests::test_support::{
    CountingAuthenticator, MockTransport, Reply, base_config, capture_logs, coordinator,
    count_matching, drain_logs,
};
use crate::transport::{TextDecoder, TransportError};
use crate::types::RequestDescriptor;

fn gaps(transport: &MockTransport) -> Vec<Duration> {
    transport
        .sent_at()
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect()
}

#[tokio::test(start_paused = true)]
async fn exponential_backoff_between_500s() {
    let transport = MockTransport::scripted(vec![
        Reply::status(500),
        Reply::status(500),
        Reply::status(500),
        Reply::json(200, "done"),
    ]);
    let auth = CountingAuthenticator::new(Duration::ZERO);
    let coordinator = coordinator(&base_config(), &transport, &auth);
    let policy = RetryPolicy::exponential(3, Duration::from_secs(1), 2.0, Duration::from_secs(30))
        .unwrap();

    let (lines, guard) = capture_logs();
    let body = coordinator
        .execute(
            &RequestDescriptor::get("/reports"),
            RequestOptions::with_retry(policy),
            TextDecoder,
        )
        .await;
    drop(guard);

    assert_eq!(body.as_deref(), Ok("done"));
    assert_eq!(transport.calls(), 4);
    assert_eq!(
        gaps(&transport),
        vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
    );

    let logs = drain_logs(lines);
    assert_eq!(count_matching(&logs, "WARN", "retry.scheduling"), 3, "{logs:?}");
    assert!(logs.iter().any(|line| line.contains("retry.outcome") && line.contains("attempts=4")));
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_retry_budget() {
    let transport = MockTransport::scripted(vec![Reply::status(503)]);
    let auth = CountingAuthenticator::new(Duration::ZERO);
    let coordinator = coordinator(&base_config(), &transport, &auth);
    let policy = RetryPolicy::exponential(3, Duration::from_secs(1), 2.0, Duration::from_secs(30))
        .unwrap();

    let res = coordinator
        .execute(
            &RequestDescriptor::get("/reports"),
            RequestOptions::with_retry(policy),
            TextDecoder,
        )
        .await;

    assert_eq!(res, Err(Error::ServerError(503)));
    assert_eq!(transport.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn waits_two_seconds_before_retrying_429() {
    let transport = MockTransport::scripted(vec![Reply::status(429), Reply::json(200, "ok")]);
    let auth = CountingAuthenticator::new(Duration::ZERO);
    let coordinator = coordinator(&base_config(), &transport, &auth);

    let (lines, guard) = capture_logs();
    let res = coordinator
        .execute(
            &RequestDescriptor::get("/quota"),
            RequestOptions::with_retry(RetryPolicy::constant(1, Duration::from_secs(2))),
            TextDecoder,
        )
        .await;
    drop(guard);

    assert_eq!(res.as_deref(), Ok("ok"));
    assert_eq!(gaps(&transport), vec![Duration::from_secs(2)]);

    let logs = drain_logs(lines);
    assert!(
        count_matching(&logs, "WARN", "429") >= 1,
        "expected warning log mentioning 429, got {logs:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn non_retryable_errors_are_not_retried() {
    let policy = RetryPolicy::constant(3, Duration::from_secs(1));
    let auth = CountingAuthenticator::new(Duration::ZERO);

    let not_found = MockTransport::scripted(vec![Reply::status(404)]);
    let res = coordinator(&base_config(), &not_found, &auth)
        .execute(
            &RequestDescriptor::get("/missing"),
            RequestOptions::with_retry(policy.clone()),
            TextDecoder,
        )
        .await;
    assert_eq!(res, Err(Error::ClientError(404)));
    assert_eq!(not_found.calls(), 1);

    let offline = MockTransport::scripted(vec![Reply::Fail(TransportError::Unavailable(
        "no route".into(),
    ))]);
    let res = coordinator(&base_config(), &offline, &auth)
        .execute(
            &RequestDescriptor::get("/missing"),
            RequestOptions::with_retry(policy),
            TextDecoder,
        )
        .await;
    assert_eq!(res, Err(Error::TransportUnavailable("no route".into())));
    assert_eq!(offline.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn descriptor_timeout_is_retryable() {
    let transport = MockTransport::scripted(vec![Reply::Hang, Reply::json(200, "late")]);
    let auth = CountingAuthenticator::new(Duration::ZERO);
    let coordinator = coordinator(&base_config(), &transport, &auth);

    let res = coordinator
        .execute(
            &RequestDescriptor::get("/slow").with_timeout(Duration::from_secs(5)),
            RequestOptions::with_retry(RetryPolicy::constant(1, Duration::from_secs(1))),
            TextDecoder,
        )
        .await;

    assert_eq!(res.as_deref(), Ok("late"));
    assert_eq!(transport.cancels().len(), 1, "the timed-out attempt is aborted");
    assert_eq!(gaps(&transport), vec![Duration::from_secs(6)]);
}
