pub mod metrics;
pub mod refresh;
