use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use request_coordinator::JitterStrategy;

#[test]
fn jitter_never_exceeds_cap() {
    let mut rng = StdRng::seed_from_u64(7);
    let cap = Duration::from_millis(40);
    for strategy in [JitterStrategy::Full, JitterStrategy::Decorrelated] {
        for _ in 0..100 {
            let delay = strategy.apply(Duration::from_millis(40), cap, &mut rng);
            assert!(delay <= cap, "{strategy:?} produced {delay:?}");
        }
    }
}

#[test]
fn decorrelated_jitter_keeps_half_the_delay() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..100 {
        let delay = JitterStrategy::Decorrelated.apply(
            Duration::from_millis(10),
            Duration::from_secs(1),
            &mut rng,
        );
        assert!(delay >= Duration::from_millis(5));
    }
}

#[test]
fn no_jitter_is_identity() {
    let mut rng = StdRng::seed_from_u64(1);
    let delay = Duration::from_millis(1234);
    assert_eq!(JitterStrategy::None.apply(delay, Duration::from_secs(1), &mut rng), delay);
}

#[test]
fn jitter_parses_case_insensitively() {
    assert_eq!("FULL".parse::<JitterStrategy>().unwrap(), JitterStrategy::Full);
    assert!("sometimes".parse::<JitterStrategy>().is_err());
}
