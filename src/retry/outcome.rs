use std::time::Duration;

use tracing::Level;
use tracing::event;

use crate::fingerprint::RequestFingerprint;

/// Summary of one logical request once it reaches a terminal result.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub fingerprint: RequestFingerprint,
    pub attempts: u32,
    pub reauthenticated: bool,
    pub success: bool,
    pub total_delay: Duration,
}

impl RetryOutcome {
    pub fn log(&self) {
        event!(
            Level::INFO,
            request = %self.fingerprint,
            attempts = self.attempts,
            reauthenticated = self.reauthenticated,
            success = self.success,
            total_delay_ms = millis(self.total_delay),
            "retry.outcome"
        );
    }
}

/// Whole milliseconds for log fields, saturating instead of truncating.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_saturates_for_huge_durations() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
