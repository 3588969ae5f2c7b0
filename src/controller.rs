//! Debounced availability checks for a live text input.
//!
//! A [`CheckController`] collapses bursts of [`request_check`] calls into a
//! single resolve once input has been quiet for the configured interval.
//! State is published through a [`watch`] channel; presentation code reads a
//! snapshot or subscribes to changes.
//!
//! [`request_check`]: CheckController::request_check

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::classify::{ClassifiedError, classify};
use crate::registry::Registry;
use crate::resolve::{Resolver, Verdict};

/// Where a controller is in its check lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Nothing scheduled.
    #[default]
    Idle,
    /// Waiting for input to go quiet.
    Pending,
    /// Probes are in flight.
    Checking,
    /// The last check produced a verdict.
    Resolved,
    /// The last check failed.
    Errored,
}

/// Observable controller state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckState {
    /// Lifecycle phase.
    pub phase: Phase,
    /// Verdict of the last successful check.
    pub verdict: Option<Verdict>,
    /// Error from the last failed check.
    pub error: Option<ClassifiedError>,
    /// When `verdict` was produced.
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl CheckState {
    /// Whether probes are currently in flight.
    #[must_use]
    pub fn is_checking(&self) -> bool {
        self.phase == Phase::Checking
    }

    /// Whether the controller has nothing scheduled or running.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self.phase, Phase::Pending | Phase::Checking)
    }
}

#[derive(Debug, Default)]
struct Session {
    latest: Option<String>,
    /// Bumped by every request and reset; a check only publishes its outcome
    /// while its generation is still current.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl Session {
    fn supersede(&mut self) -> u64 {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        self.generation
    }
}

#[derive(Debug)]
struct Shared<R> {
    resolver: Resolver<R>,
    session: Mutex<Session>,
    state: watch::Sender<CheckState>,
}

impl<R: Registry + 'static> Shared<R> {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `Checking` if `generation` is still the latest request.
    fn begin(&self, generation: u64) -> Option<String> {
        let mut session = self.session();
        if session.generation != generation {
            return None;
        }
        // Once started, a check is no longer a cancellable timer.
        session.timer = None;
        let name = session.latest.clone()?;
        self.state.send_modify(|state| {
            state.phase = Phase::Checking;
            state.error = None;
        });
        Some(name)
    }

    async fn run(&self, generation: u64, name: String) {
        trace!(name, generation, "checking");
        let outcome = self.resolver.resolve(&name).await;

        let session = self.session();
        if session.generation != generation {
            debug!(name, generation, "discarding stale result");
            return;
        }
        match outcome {
            Ok(verdict) => self.state.send_modify(|state| {
                state.phase = Phase::Resolved;
                state.verdict = Some(verdict);
                state.error = None;
                state.last_checked_at = Some(Utc::now());
            }),
            Err(e) => {
                let error = classify(&e);
                debug!(name, kind = %error.kind, "check failed");
                self.state.send_modify(|state| {
                    state.phase = Phase::Errored;
                    state.verdict = None;
                    state.error = Some(error);
                    state.last_checked_at = None;
                });
            }
        }
        drop(session);
    }
}

/// Debounces availability checks for one input field.
///
/// Only the most recent request can publish a result: scheduling a new check
/// cancels any pending timer, and a check already in flight finishes but its
/// outcome is dropped. Failed checks are never retried automatically.
///
/// Methods that schedule work spawn Tokio tasks and must be called from
/// within a Tokio runtime.
///
/// # Example
///
/// ```no_run
/// use npm_avail::config::Config;
/// use npm_avail::controller::CheckController;
/// use npm_avail::registry::HttpRegistry;
///
/// # async fn demo() {
/// let config = Config::default();
/// let controller = CheckController::new(HttpRegistry::new(config.clone()), config.debounce);
/// let mut updates = controller.subscribe();
///
/// controller.request_check("my-org");
/// let state = updates.wait_for(|s| s.is_settled()).await.unwrap().clone();
/// println!("{:?}", state.verdict);
/// # }
/// ```
#[derive(Debug)]
pub struct CheckController<R> {
    shared: Arc<Shared<R>>,
    debounce: Duration,
}

impl<R: Registry + 'static> CheckController<R> {
    /// Create an idle controller resolving against `registry`.
    pub fn new(registry: R, debounce: Duration) -> Self {
        let (state, _) = watch::channel(CheckState::default());
        Self {
            shared: Arc::new(Shared {
                resolver: Resolver::new(registry),
                session: Mutex::new(Session::default()),
                state,
            }),
            debounce,
        }
    }

    /// The resolver checks are run with.
    pub fn resolver(&self) -> &Resolver<R> {
        &self.shared.resolver
    }

    /// A copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CheckState {
        self.shared.state.borrow().clone()
    }

    /// The most recently requested name, if any.
    #[must_use]
    pub fn latest_name(&self) -> Option<String> {
        self.shared.session().latest.clone()
    }

    /// Receive every subsequent state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CheckState> {
        self.shared.state.subscribe()
    }

    /// Schedule a check of `name` once input has been quiet for the debounce
    /// interval.
    ///
    /// Blank input cancels any pending check and returns to idle without
    /// scheduling anything. A zero interval starts the check immediately.
    /// Callers are expected to pass only names that passed validation.
    pub fn request_check(&self, name: &str) {
        let name = name.trim();
        let mut session = self.shared.session();
        let generation = session.supersede();

        if name.is_empty() {
            session.latest = None;
            self.shared.state.send_modify(|state| state.phase = Phase::Idle);
            return;
        }

        session.latest = Some(name.to_owned());
        self.shared
            .state
            .send_modify(|state| state.phase = Phase::Pending);

        if self.debounce.is_zero() {
            drop(session);
            if let Some(name) = self.shared.begin(generation) {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move { shared.run(generation, name).await });
            }
            return;
        }

        trace!(name, generation, delay = ?self.debounce, "scheduled");
        let shared = Arc::clone(&self.shared);
        let delay = self.debounce;
        session.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(name) = shared.begin(generation) {
                shared.run(generation, name).await;
            }
        }));
    }

    /// Re-run the last check if it failed with a recoverable error.
    ///
    /// Returns whether a retry was scheduled.
    pub fn retry(&self) -> bool {
        let recoverable = {
            let state = self.shared.state.borrow();
            state.phase == Phase::Errored
                && state.error.as_ref().is_some_and(ClassifiedError::is_recoverable)
        };
        if !recoverable {
            return false;
        }
        let Some(name) = self.latest_name() else {
            return false;
        };
        self.request_check(&name);
        true
    }

    /// Cancel pending work and return to the initial idle state.
    pub fn reset(&self) {
        let mut session = self.shared.session();
        session.supersede();
        session.latest = None;
        self.shared.state.send_replace(CheckState::default());
    }
}

impl<R> Drop for CheckController<R> {
    fn drop(&mut self) {
        let mut session = self
            .shared
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = session.timer.take() {
            timer.abort();
        }
    }
}
