mod outcome;
mod plan;

pub(crate) use outcome::millis;
pub use outcome::RetryOutcome;
pub use plan::{JitterStrategy, RetryPolicy};
