use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::Error;
use crate::telemetry::metrics::{MetricEvent, MetricsSink, NoopMetrics};
use crate::telemetry::refresh::RefreshTelemetry;

use super::{Credentials, ReAuthenticator};

pub type RefreshResult = Result<Credentials, Error>;

/// Invoked once per failed refresh cycle, before any waiter is resumed.
pub type FailureHook = Box<dyn Fn(&Error) + Send + Sync>;

enum GateState {
    Idle,
    Refreshing {
        telemetry: RefreshTelemetry,
        waiters: VecDeque<oneshot::Sender<RefreshResult>>,
    },
}

/// Credentials currently held by the gate and the refresh generation that
/// produced them. Generation 0 means "seeded or none".
struct Current {
    credentials: Option<Credentials>,
    generation: u64,
}

/// Single-flight coordinator for credential refresh.
///
/// At most one [`ReAuthenticator::refresh`] call is outstanding at a time.
/// Every request that needs fresh credentials while a refresh is in flight
/// joins its waiter queue and receives the same result, in the order it
/// joined.
pub struct ReauthenticationGate {
    authenticator: Arc<dyn ReAuthenticator>,
    state: Mutex<GateState>,
    current: Mutex<Current>,
    refreshes: AtomicU64,
    on_failure: Option<FailureHook>,
    metrics: Arc<dyn MetricsSink>,
}

impl ReauthenticationGate {
    pub fn new(authenticator: Arc<dyn ReAuthenticator>) -> Self {
        Self {
            authenticator,
            state: Mutex::new(GateState::Idle),
            current: Mutex::new(Current {
                credentials: None,
                generation: 0,
            }),
            refreshes: AtomicU64::new(0),
            on_failure: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Installs credentials obtained outside the gate (e.g. at login).
    pub fn seed(&self, credentials: Credentials) {
        let mut current = self.lock_current();
        current.credentials = Some(credentials);
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.lock_current().credentials.clone()
    }

    /// Credentials together with the generation they belong to.
    pub fn snapshot(&self) -> (Option<Credentials>, u64) {
        let current = self.lock_current();
        (current.credentials.clone(), current.generation)
    }

    pub fn generation(&self) -> u64 {
        self.lock_current().generation
    }

    /// Number of refresh exchanges started since construction.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), GateState::Refreshing { .. })
    }

    /// Obtains credentials newer than `seen_generation`.
    ///
    /// If a refresh already completed after the caller's credentials were
    /// read, its result is returned without another exchange. Otherwise the
    /// caller either starts a refresh (gate idle) or joins the one in flight.
    pub async fn reauthenticate(self: &Arc<Self>, seen_generation: u64) -> RefreshResult {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            {
                let current = self.lock_current();
                if current.generation > seen_generation
                    && let Some(credentials) = current.credentials.clone()
                {
                    debug!(
                        generation = current.generation,
                        seen_generation, "refresh.already_satisfied"
                    );
                    return Ok(credentials);
                }
            }
            match &mut *state {
                GateState::Refreshing { telemetry, waiters } => {
                    waiters.push_back(tx);
                    telemetry.emit_joined(waiters.len());
                }
                GateState::Idle => {
                    let telemetry = RefreshTelemetry::new("reauthentication_gate");
                    let mut waiters = VecDeque::new();
                    waiters.push_back(tx);
                    *state = GateState::Refreshing {
                        telemetry: telemetry.clone(),
                        waiters,
                    };
                    self.refreshes.fetch_add(1, Ordering::SeqCst);
                    let gate = Arc::clone(self);
                    tokio::spawn(async move { gate.run_refresh(telemetry).await });
                }
            }
        }
        rx.await
            .unwrap_or_else(|_| Err(Error::ReAuthentication("refresh task dropped".into())))
    }

    async fn run_refresh(self: Arc<Self>, telemetry: RefreshTelemetry) {
        telemetry.emit_start();
        self.metrics.record(&MetricEvent::RefreshStarted);

        // The exchange runs in its own task so a panicking authenticator
        // still resolves every waiter.
        let authenticator = Arc::clone(&self.authenticator);
        let result = match tokio::spawn(async move { authenticator.refresh().await }).await {
            Ok(result) => result,
            Err(join_err) => Err(Error::ReAuthentication(format!(
                "authenticator task failed: {join_err}"
            ))),
        };

        // The new generation and the return to Idle must become visible
        // together, or a caller could join this cycle with a generation that
        // already names its result.
        let waiters = {
            let mut state = self.lock_state();
            if let Ok(credentials) = &result {
                let mut current = self.lock_current();
                current.credentials = Some(credentials.clone());
                current.generation += 1;
            }
            match std::mem::replace(&mut *state, GateState::Idle) {
                GateState::Refreshing { waiters, .. } => waiters,
                GateState::Idle => VecDeque::new(),
            }
        };

        match &result {
            Ok(_) => telemetry.emit_success(waiters.len()),
            Err(err) => {
                telemetry.emit_failure(err, waiters.len());
                if let Some(hook) = &self.on_failure {
                    hook(err);
                }
            }
        }
        self.metrics.record(&MetricEvent::RefreshCompleted {
            success: result.is_ok(),
            waiters: waiters.len(),
        });

        for waiter in waiters {
            if waiter.send(result.clone()).is_err() {
                warn!(cycle_id = %telemetry.cycle_id(), "refresh.waiter_gone");
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_current(&self) -> MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
