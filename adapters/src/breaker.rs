//! One breaker instance per external system (registry, compute, dns,
//! router), per §5: 5 consecutive failures opens it, a 30s cool-down moves
//! it to half-open, and a single trial call decides whether it closes again
//! or reopens.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use platform_common::Error;
use tracing::{debug, warn};

const FAILURE_THRESHOLD: u32 = 5;
const COOL_DOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_trial_in_flight: bool,
}

/// Wraps a fallible call so that once an external system starts failing
/// consistently, callers get an immediate `Transient` instead of piling up
/// on a dead dependency.
pub struct Breaker {
    name: String,
    inner: Mutex<Inner>,
}

impl Breaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                opened_at: None,
                half_open_trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock().unwrap();
        match inner.opened_at {
            None => BreakerState::Closed,
            Some(opened_at) if opened_at.elapsed() >= COOL_DOWN => BreakerState::HalfOpen,
            Some(_) => BreakerState::Open,
        }
    }

    /// Runs `call` if the breaker allows it, otherwise returns `Transient`
    /// without invoking it.
    pub async fn call<F, Fut, T>(&self, call: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let may_trial = {
            let mut inner = self.inner.lock().unwrap();
            match inner.opened_at {
                None => true,
                Some(opened_at) if opened_at.elapsed() >= COOL_DOWN => {
                    if inner.half_open_trial_in_flight {
                        false
                    } else {
                        inner.half_open_trial_in_flight = true;
                        true
                    }
                }
                Some(_) => false,
            }
        };

        if !may_trial {
            return Err(Error::Transient(format!(
                "circuit breaker for {} is open",
                self.name
            )));
        }

        let result = call().await;

        let mut inner = self.inner.lock().unwrap();
        inner.half_open_trial_in_flight = false;
        match &result {
            Ok(_) => {
                if inner.consecutive_failures > 0 || inner.opened_at.is_some() {
                    debug!(breaker = %self.name, "closing after a successful call");
                }
                inner.consecutive_failures = 0;
                inner.opened_at = None;
            }
            Err(Error::Permanent(_)) => {
                // A permanent failure is the caller's fault (bad input),
                // not the dependency's; it does not count toward opening.
            }
            Err(_) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= FAILURE_THRESHOLD {
                    warn!(breaker = %self.name, "opening after consecutive failures");
                    inner.opened_at = Some(Instant::now());
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = Breaker::new("test");
        for _ in 0..FAILURE_THRESHOLD {
            let _ = breaker
                .call(|| async { Err::<(), _>(Error::Transient("boom".into())) })
                .await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let result = breaker.call(|| async { Ok::<_, Error>(()) }).await;
        assert!(matches!(result, Err(Error::Transient(_))));
    }

    #[tokio::test]
    async fn permanent_failures_do_not_open_it() {
        let breaker = Breaker::new("test");
        for _ in 0..(FAILURE_THRESHOLD * 2) {
            let _ = breaker
                .call(|| async { Err::<(), _>(Error::Permanent("bad input".into())) })
                .await;
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let breaker = Breaker::new("test");
        for _ in 0..(FAILURE_THRESHOLD - 1) {
            let _ = breaker
                .call(|| async { Err::<(), _>(Error::Transient("boom".into())) })
                .await;
        }
        let _ = breaker.call(|| async { Ok::<_, Error>(()) }).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
