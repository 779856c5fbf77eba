//! Credential refresh: the application-supplied [`ReAuthenticator`] and the
//! single-flight [`ReauthenticationGate`] in front of it.

mod credentials;
mod gate;

use async_trait::async_trait;

use crate::errors::Error;

pub use credentials::{AUTHORIZATION, Credentials};
pub use gate::{FailureHook, ReauthenticationGate, RefreshResult};

/// Performs the credential-refresh exchange. Supplied by the application;
/// the gate calls it at most once per refresh cycle.
#[async_trait]
pub trait ReAuthenticator: Send + Sync + 'static {
    async fn refresh(&self) -> Result<Credentials, Error>;
}
