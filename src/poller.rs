//! Bounded status polling
//!
//! `StatusPoller` repeats a point-in-time query until a terminal predicate holds or
//! the attempt budget runs out. Running out is not an error: the last observed value
//! comes back as `PollOutcome::GaveUp` so the caller can tell "still pending" apart
//! from a real terminal status. Rate-limited reads are retried with a fixed backoff
//! nested inside each attempt.

use crate::config::EngineConfig;
use crate::error::{SwapError, SwapResult};
use crate::types::{NormalizedStatus, StatusKind};

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Fixed backoff applied to rate-limited calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitBackoff {
    pub delay: Duration,
    pub max_retries: u32,
}

impl Default for RateLimitBackoff {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_retries: 3,
        }
    }
}

impl RateLimitBackoff {
    /// Run `call`, retrying rate-limit errors; exhaustion surfaces as upstream unavailable
    pub async fn run<T, F, Fut>(&self, service: &str, mut call: F) -> SwapResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SwapResult<T>>,
    {
        let mut retries = 0;
        loop {
            match call().await {
                Err(e) if e.is_rate_limited() => {
                    if retries >= self.max_retries {
                        return Err(SwapError::upstream(
                            service,
                            format!("rate limited after {} retries", retries),
                        ));
                    }
                    retries += 1;
                    crate::metrics::record_rate_limited(service);
                    warn!(
                        "Rate limited by {}, waiting {:?} ({} retries left)",
                        service,
                        self.delay,
                        self.max_retries - retries
                    );
                    tokio::time::sleep(self.delay).await;
                }
                other => return other,
            }
        }
    }
}

/// Timing for one polling session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the predicate holds
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5_000),
            max_attempts: Some(20),
        }
    }
}

impl PollPolicy {
    pub fn from_engine(engine: &EngineConfig) -> Self {
        Self {
            interval: Duration::from_millis(engine.poll_interval_ms),
            max_attempts: Some(engine.max_poll_attempts),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Bound attempts so that polling stops around `remaining`
    pub fn until(mut self, remaining: Duration) -> Self {
        let interval_ms = self.interval.as_millis().max(1);
        let attempts = (remaining.as_millis() / interval_ms) as u32 + 1;
        self.max_attempts = Some(match self.max_attempts {
            Some(max) => max.min(attempts),
            None => attempts,
        });
        self
    }
}

/// State of one polling session
#[derive(Debug, Clone, Copy)]
struct PollState {
    attempts: u32,
    started_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// The predicate held
    Terminal { status: T, attempts: u32 },
    /// Attempts ran out; the last value did not satisfy the predicate
    GaveUp { last: T, attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Terminal { attempts, .. } | PollOutcome::GaveUp { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PollOutcome::Terminal { .. })
    }
}

/// Statuses after which settlement polling stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSet(HashSet<StatusKind>);

impl TerminalSet {
    pub fn new(kinds: impl IntoIterator<Item = StatusKind>) -> Self {
        Self(kinds.into_iter().collect())
    }

    /// `NotFound` is always terminal: an identifier the backend never saw will not appear
    pub fn contains(&self, kind: StatusKind) -> bool {
        kind == StatusKind::NotFound || self.0.contains(&kind)
    }
}

/// Reusable bounded polling loop
#[derive(Debug, Clone, Copy)]
pub struct StatusPoller {
    backoff: RateLimitBackoff,
}

impl StatusPoller {
    pub fn new(backoff: RateLimitBackoff) -> Self {
        Self { backoff }
    }

    pub fn from_engine(engine: &EngineConfig) -> Self {
        Self::new(RateLimitBackoff {
            delay: Duration::from_millis(engine.rate_limit_backoff_ms),
            max_retries: engine.rate_limit_retries,
        })
    }

    pub fn backoff(&self) -> RateLimitBackoff {
        self.backoff
    }

    /// Poll `fetch` until `done` holds or the attempt budget is exhausted
    pub async fn poll<T, F, Fut, P>(
        &self,
        service: &str,
        policy: PollPolicy,
        done: P,
        mut fetch: F,
    ) -> SwapResult<PollOutcome<T>>
    where
        T: std::fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = SwapResult<T>>,
        P: Fn(&T) -> bool,
    {
        let mut state = PollState {
            attempts: 0,
            started_at: Instant::now(),
        };

        loop {
            let status = self.backoff.run(service, &mut fetch).await?;
            state.attempts += 1;
            crate::metrics::record_poll_attempt(service);

            if done(&status) {
                debug!(
                    "{} reached {:?} after {} attempts ({:?})",
                    service,
                    status,
                    state.attempts,
                    state.started_at.elapsed()
                );
                return Ok(PollOutcome::Terminal {
                    status,
                    attempts: state.attempts,
                });
            }

            if let Some(max) = policy.max_attempts {
                if state.attempts >= max {
                    warn!(
                        "{} still {:?} after {} attempts ({:?}), giving up",
                        service,
                        status,
                        state.attempts,
                        state.started_at.elapsed()
                    );
                    return Ok(PollOutcome::GaveUp {
                        last: status,
                        attempts: state.attempts,
                    });
                }
            }

            debug!(
                "{} status {:?} (attempt {}), next poll in {:?}",
                service, status, state.attempts, policy.interval
            );
            tokio::time::sleep(policy.interval).await;
        }
    }

    /// Poll a normalized status until it is in `terminal`
    pub async fn poll_status<F, Fut>(
        &self,
        service: &str,
        policy: PollPolicy,
        terminal: &TerminalSet,
        fetch: F,
    ) -> SwapResult<PollOutcome<NormalizedStatus>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SwapResult<NormalizedStatus>>,
    {
        self.poll(service, policy, |s: &NormalizedStatus| terminal.contains(s.kind), fetch)
            .await
    }
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::new(RateLimitBackoff::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn status(kind: StatusKind) -> NormalizedStatus {
        NormalizedStatus::new(kind, kind.to_string())
    }

    fn squid_terminal() -> TerminalSet {
        TerminalSet::new([
            StatusKind::Success,
            StatusKind::PartialSuccess,
            StatusKind::NeedsGas,
            StatusKind::NotFound,
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_terminal_status() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = StatusPoller::default();
        let start = Instant::now();

        let c = calls.clone();
        let outcome = poller
            .poll_status("test", PollPolicy::default(), &squid_terminal(), || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(if n < 2 {
                        status(StatusKind::Processing)
                    } else {
                        status(StatusKind::Success)
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Terminal {
                status: status(StatusKind::Success),
                attempts: 3
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_terminal_on_first_read() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = StatusPoller::default();
        // Even a terminal set without NotFound stops on it
        let terminal = TerminalSet::new([StatusKind::Success]);

        let c = calls.clone();
        let outcome = poller
            .poll_status("test", PollPolicy::default(), &terminal, || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok(status(StatusKind::NotFound)) }
            })
            .await
            .unwrap();

        assert!(outcome.is_terminal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_within_budget() {
        let poller = StatusPoller::default();
        let policy = PollPolicy {
            interval: Duration::from_millis(5_000),
            max_attempts: Some(4),
        };
        let start = Instant::now();

        let outcome = poller
            .poll_status("test", policy, &squid_terminal(), || async {
                Ok(status(StatusKind::Processing))
            })
            .await
            .unwrap();

        match outcome {
            PollOutcome::GaveUp { last, attempts } => {
                assert_eq!(last.kind, StatusKind::Processing);
                assert_eq!(attempts, 4);
            }
            other => panic!("expected give-up, got {:?}", other),
        }
        assert!(start.elapsed() <= Duration::from_millis(4 * 5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_status() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = StatusPoller::default();
        let start = Instant::now();

        let c = calls.clone();
        let outcome = poller
            .poll_status("squid", PollPolicy::default(), &squid_terminal(), || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SwapError::RateLimited {
                            service: "squid".to_string(),
                        })
                    } else {
                        Ok(status(StatusKind::Success))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_is_upstream_unavailable() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = StatusPoller::default();

        let c = calls.clone();
        let err = poller
            .poll_status("squid", PollPolicy::default(), &squid_terminal(), || {
                c.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<NormalizedStatus, _>(SwapError::RateLimited {
                        service: "squid".to_string(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::UpstreamUnavailable);
        assert!(!err.is_rate_limited());
        // One initial call plus three retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_surface_immediately() {
        let poller = StatusPoller::default();
        let err = poller
            .poll_status("test", PollPolicy::default(), &squid_terminal(), || async {
                Err::<NormalizedStatus, _>(SwapError::upstream("test", "connection reset"))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_policy_until_bounds_attempts() {
        let policy = PollPolicy::default().until(Duration::from_secs(12));
        assert_eq!(policy.max_attempts, Some(3));

        let unbounded = PollPolicy::default()
            .with_max_attempts(None)
            .until(Duration::from_secs(60));
        assert_eq!(unbounded.max_attempts, Some(13));
    }
}
