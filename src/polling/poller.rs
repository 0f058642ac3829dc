use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use super::backoff::BackoffPolicy;
use crate::routine::shutdown::Shutdown;

#[derive(Debug)]
pub enum PollOutcome<T, E> {
    Done(T),
    Pending(String),
    Fatal(E),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollLimit {
    Attempts(u32),
    Elapsed(Duration),
}

impl PollLimit {
    fn exhausted(&self, state: &RetryState) -> bool {
        match self {
            PollLimit::Attempts(max) => state.attempt >= *max,
            PollLimit::Elapsed(max) => state.elapsed >= *max,
        }
    }
}

impl std::fmt::Display for PollLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollLimit::Attempts(n) => write!(f, "{n} attempts"),
            PollLimit::Elapsed(d) => write!(f, "{} seconds", d.as_secs()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub elapsed: Duration,
    pub last_observed: Option<String>,
}

#[derive(Error, Debug)]
pub enum PollError<E> {
    #[error("{0}")]
    Fatal(E),

    #[error(
        "Timed out after {attempts} attempts ({} seconds); last observed: {}",
        elapsed.as_secs(),
        last_observed.as_deref().unwrap_or("nothing")
    )]
    Timeout {
        attempts: u32,
        elapsed: Duration,
        last_observed: Option<String>,
    },

    #[error("Interrupted by {signal} after {attempts} attempts")]
    Interrupted { signal: &'static str, attempts: u32 },
}

impl<E> PollError<E> {
    pub fn map_fatal<F>(self, f: impl FnOnce(E) -> F) -> PollError<F> {
        match self {
            PollError::Fatal(e) => PollError::Fatal(f(e)),
            PollError::Timeout {
                attempts,
                elapsed,
                last_observed,
            } => PollError::Timeout {
                attempts,
                elapsed,
                last_observed,
            },
            PollError::Interrupted { signal, attempts } => {
                PollError::Interrupted { signal, attempts }
            }
        }
    }
}

/// Calls a check until it reports `Done` or `Fatal`, sleeping with
/// exponential backoff in between, or until the limit is hit.
#[derive(Debug, Clone)]
pub struct Poller {
    pub backoff: BackoffPolicy,
    pub limit: PollLimit,
    shutdown: Option<Shutdown>,
}

impl Poller {
    pub fn new(backoff: BackoffPolicy, limit: PollLimit) -> Self {
        Self {
            backoff,
            limit,
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    #[instrument("poll", skip(self, check), fields(limit = %self.limit))]
    pub async fn poll<T, E, F, Fut>(&self, target: &str, mut check: F) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PollOutcome<T, E>>,
    {
        let started = Instant::now();
        let mut state = RetryState::default();
        let mut shutdown = self.shutdown.clone();

        loop {
            state.attempt += 1;
            match check().await {
                PollOutcome::Done(value) => {
                    info!(
                        "{} reached its expected state after {} attempts.",
                        target, state.attempt
                    );
                    return Ok(value);
                }
                PollOutcome::Fatal(e) => {
                    warn!(
                        "{} hit an unrecoverable state on attempt {}.",
                        target, state.attempt
                    );
                    return Err(PollError::Fatal(e));
                }
                PollOutcome::Pending(observed) => {
                    state.elapsed = started.elapsed();
                    state.last_observed = Some(observed);

                    if self.limit.exhausted(&state) {
                        warn!(
                            "Gave up waiting for {} after {} attempts ({} seconds).",
                            target,
                            state.attempt,
                            state.elapsed.as_secs()
                        );
                        return Err(PollError::Timeout {
                            attempts: state.attempt,
                            elapsed: state.elapsed,
                            last_observed: state.last_observed,
                        });
                    }

                    let delay = self.backoff.delay(state.attempt);
                    info!(
                        "Waiting for {} ({}). Retrying in {} seconds (attempts: {})",
                        target,
                        state.last_observed.as_deref().unwrap_or_default(),
                        delay.as_secs(),
                        state.attempt
                    );

                    match shutdown.as_mut() {
                        Some(shutdown) => {
                            if shutdown.sleep_or_shutdown(delay).await {
                                return Err(PollError::Interrupted {
                                    signal: shutdown.signal().unwrap_or("shutdown"),
                                    attempts: state.attempt,
                                });
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }
        }
    }
}
