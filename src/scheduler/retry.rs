//! Per-target retry coordination.
//!
//! A `RetryCoordinator` drives one target through
//! `FastRetry -> Backoff -> {Success, Abandoned}`:
//! - the first `fast_retry_count` failures are retried at a fixed short interval
//! - after that the delay starts at `initial_backoff` and doubles, capped at
//!   `max_backoff`; once the cap is reached it stays there
//! - the target's `BoundedScope` is checked before every attempt, and wakes
//!   the coordinator early if it expires mid-sleep
//!
//! Each delay is measured from the start of the attempt that just failed,
//! so slow attempts do not stretch the cadence.

use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::acquire::{AttemptRecord, attempt};
use crate::client::RateLimitedClient;
use crate::error::DropcatchError;
use crate::remote::RemoteService;
use crate::target::Target;

/// How long a single target keeps being retried
pub const DEFAULT_PURCHASING_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Floor for every retry delay, so a zeroed policy still yields between attempts.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Retry cadence settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of failures retried at `fast_retry_interval`.
    pub fast_retry_count: u32,
    pub fast_retry_interval: Duration,
    /// First backoff delay after the fast phase.
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            fast_retry_count: 3,
            fast_retry_interval: Duration::from_millis(100),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn with_fast_retries(mut self, count: u32, interval: Duration) -> Self {
        self.fast_retry_count = count;
        self.fast_retry_interval = interval;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

/// Where a coordinator is in its retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    FastRetry,
    /// Exponential phase; holds the delay last handed out.
    Backoff { current: Duration },
}

/// Attempt counter and phase for one target. Owned by its coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    attempt_number: u32,
    phase: RetryPhase,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            attempt_number: 0,
            phase: RetryPhase::FastRetry,
        }
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    /// Count a new attempt and return its sequence number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt_number = self.attempt_number.saturating_add(1);
        self.attempt_number
    }

    /// Delay to wait after the current attempt failed.
    ///
    /// Attempt `fast_retry_count + k` (k >= 1) waits
    /// `min(initial_backoff * 2^(k-1), max_backoff)`.
    pub fn delay_after_failure(&mut self, policy: &RetryPolicy) -> Duration {
        if self.attempt_number <= policy.fast_retry_count {
            return policy.fast_retry_interval.max(MIN_RETRY_DELAY);
        }

        let next = match self.phase {
            RetryPhase::FastRetry => policy.initial_backoff,
            RetryPhase::Backoff { current } => current.saturating_mul(2),
        }
        .min(policy.max_backoff)
        .max(MIN_RETRY_DELAY);

        self.phase = RetryPhase::Backoff { current: next };
        next
    }
}

/// Hard deadline for one target, independent of every other target.
///
/// A timer task cancels the scope's token when the window elapses.
#[derive(Debug)]
pub struct BoundedScope {
    token: CancellationToken,
    window: Duration,
    deadline: Instant,
}

impl BoundedScope {
    /// Open a scope whose window starts at `start`. Must be called inside a tokio runtime.
    pub fn starting_at(start: Instant, window: Duration) -> Self {
        let token = CancellationToken::new();
        let deadline = start + window;

        let timer = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep_until(deadline) => timer.cancel(),
                _ = timer.cancelled() => {}
            }
        });

        Self {
            token,
            window,
            deadline,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Resolves once the window has elapsed.
    pub async fn expired(&self) {
        self.token.cancelled().await
    }
}

impl Drop for BoundedScope {
    fn drop(&mut self) {
        // Stops the timer task.
        self.token.cancel();
    }
}

/// Terminal outcome for one target. Emitted exactly once.
#[derive(Debug, Serialize)]
pub struct AcquisitionResult {
    pub target: Target,
    pub success: bool,
    /// Why the target was not acquired.
    #[serde(serialize_with = "error_text")]
    pub error: Option<DropcatchError>,
    /// Failure of the final attempt, kept for diagnostics when the window closes.
    #[serde(serialize_with = "error_text")]
    pub last_failure: Option<DropcatchError>,
    pub attempts: u32,
}

impl AcquisitionResult {
    pub fn succeeded(target: Target, attempts: u32) -> Self {
        Self {
            target,
            success: true,
            error: None,
            last_failure: None,
            attempts,
        }
    }

    pub fn abandoned(target: Target, window: Duration, last_failure: Option<DropcatchError>, attempts: u32) -> Self {
        Self {
            target,
            success: false,
            error: Some(DropcatchError::DeadlineExceeded { window }),
            last_failure,
            attempts,
        }
    }

    pub fn failed(target: Target, error: DropcatchError) -> Self {
        Self {
            target,
            success: false,
            error: Some(error),
            last_failure: None,
            attempts: 0,
        }
    }
}

fn error_text<S: Serializer>(error: &Option<DropcatchError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Drives attempts for one target until success or its scope expires.
pub struct RetryCoordinator<R> {
    client: Arc<RateLimitedClient<R>>,
    policy: RetryPolicy,
    target: Target,
    scope: BoundedScope,
}

impl<R: RemoteService> RetryCoordinator<R> {
    pub fn new(client: Arc<RateLimitedClient<R>>, policy: RetryPolicy, target: Target, scope: BoundedScope) -> Self {
        Self {
            client,
            policy,
            target,
            scope,
        }
    }

    pub async fn run(self) -> AcquisitionResult {
        let RetryCoordinator {
            client,
            policy,
            target,
            scope,
        } = self;

        let released_at = Instant::now();
        let mut state = RetryState::new();
        let mut last_failure: Option<DropcatchError> = None;

        loop {
            if scope.is_expired() {
                tracing::warn!(
                    domain = %target,
                    attempts = state.attempt_number(),
                    window_secs = scope.window().as_secs(),
                    "No success within purchasing window"
                );
                return AcquisitionResult::abandoned(target, scope.window(), last_failure, state.attempt_number());
            }

            let sequence = state.begin_attempt();
            let started = Instant::now();
            tracing::info!(
                attempt = sequence,
                domain = %target,
                phase = ?state.phase(),
                "Starting registration attempt"
            );

            let result = attempt(&client, &target).await;
            let record = AttemptRecord::finish(sequence, started, &result);

            match result {
                Ok(()) => {
                    tracing::info!(
                        attempt = record.sequence,
                        domain = %target,
                        attempt_duration_ms = record.duration.as_millis() as u64,
                        total_ms = released_at.elapsed().as_millis() as u64,
                        "SUCCESS - domain registered"
                    );
                    return AcquisitionResult::succeeded(target, sequence);
                }
                Err(err) => {
                    let delay = state.delay_after_failure(&policy);
                    let pause = delay.saturating_sub(record.duration);
                    tracing::warn!(
                        attempt = record.sequence,
                        domain = %target,
                        outcome = ?record.outcome,
                        error = %err,
                        attempt_duration_ms = record.duration.as_millis() as u64,
                        next_delay_ms = delay.as_millis() as u64,
                        "Attempt failed"
                    );
                    last_failure = Some(err);

                    tokio::select! {
                        _ = sleep(pause) => {}
                        _ = scope.expired() => {}
                    }
                }
            }
        }
    }
}
