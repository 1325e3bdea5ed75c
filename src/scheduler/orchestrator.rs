//! Fans the release out to one retry coordinator per target.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::client::RateLimitedClient;
use crate::error::DropcatchError;
use crate::remote::RemoteService;
use super::retry::{AcquisitionResult, BoundedScope, DEFAULT_PURCHASING_WINDOW, RetryCoordinator, RetryPolicy};
use crate::target::Target;

/// How targets are worked through after the release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Every target gets its own task, all starting at the release instant.
    #[default]
    Concurrent,
    /// One target at a time, each with a fresh window.
    Sequential,
}

/// Outcome of a full run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<AcquisitionResult>,
}

impl RunSummary {
    fn from_results(results: Vec<AcquisitionResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

pub struct Orchestrator<R> {
    client: Arc<RateLimitedClient<R>>,
    policy: RetryPolicy,
    window: Duration,
    mode: DispatchMode,
}

impl<R: RemoteService + 'static> Orchestrator<R> {
    pub fn new(client: Arc<RateLimitedClient<R>>) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            window: DEFAULT_PURCHASING_WINDOW,
            mode: DispatchMode::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn client(&self) -> &Arc<RateLimitedClient<R>> {
        &self.client
    }

    /// Acquire every target. Results come back in input order.
    pub async fn run(&self, targets: &[Target], released_at: Instant) -> RunSummary {
        tracing::info!(
            targets = targets.len(),
            mode = ?self.mode,
            window_secs = self.window.as_secs(),
            "Starting domain acquisition"
        );

        let results = match self.mode {
            DispatchMode::Concurrent => self.run_concurrent(targets, released_at).await,
            DispatchMode::Sequential => self.run_sequential(targets).await,
        };

        let summary = RunSummary::from_results(results);
        for result in &summary.results {
            if result.success {
                tracing::info!(domain = %result.target, attempts = result.attempts, "Acquired");
            } else {
                tracing::error!(
                    domain = %result.target,
                    attempts = result.attempts,
                    error = ?result.error.as_ref().map(ToString::to_string),
                    "Not acquired"
                );
            }
        }
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Domain acquisition finished"
        );
        summary
    }

    async fn run_concurrent(&self, targets: &[Target], released_at: Instant) -> Vec<AcquisitionResult> {
        let handles: Vec<_> = targets
            .iter()
            .map(|target| {
                let coordinator = RetryCoordinator::new(
                    self.client.clone(),
                    self.policy,
                    target.clone(),
                    BoundedScope::starting_at(released_at, self.window),
                );
                tokio::spawn(coordinator.run())
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(targets)
            .map(|(joined, target)| {
                joined.unwrap_or_else(|e| {
                    tracing::error!(domain = %target, error = %e, "Acquisition task failed");
                    AcquisitionResult::failed(target.clone(), DropcatchError::Worker(e.to_string()))
                })
            })
            .collect()
    }

    async fn run_sequential(&self, targets: &[Target]) -> Vec<AcquisitionResult> {
        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            let scope = BoundedScope::starting_at(Instant::now(), self.window);
            let coordinator = RetryCoordinator::new(self.client.clone(), self.policy, target.clone(), scope);
            results.push(coordinator.run().await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::remote::{DomainStatus, Rejection};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Per-domain scripted remote: domains listed in `available` succeed
    /// on their first claim, the rest answer DOMAIN_OCCUPIED.
    #[derive(Default)]
    struct DropRemote {
        available: Vec<&'static str>,
        reject_all: Option<Rejection>,
        claims: Mutex<HashMap<String, u32>>,
        order: Mutex<Vec<(String, Instant)>>,
    }

    impl DropRemote {
        fn available(domains: &[&'static str]) -> Self {
            Self {
                available: domains.to_vec(),
                ..Default::default()
            }
        }

        fn claims_for(&self, domain: &str) -> u32 {
            self.claims.lock().unwrap().get(domain).copied().unwrap_or(0)
        }

        fn total_claims(&self) -> u32 {
            self.claims.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl RemoteService for DropRemote {
        async fn claim(&self, target: &Target, _auto_pay: bool) -> Result<()> {
            *self.claims.lock().unwrap().entry(target.to_string()).or_default() += 1;
            self.order.lock().unwrap().push((target.to_string(), Instant::now()));
            if let Some(rejection) = self.reject_all {
                return Err(DropcatchError::Rejected(rejection));
            }
            if self.available.iter().any(|d| *d == target.as_str()) {
                Ok(())
            } else {
                Err(DropcatchError::RemoteStatus("DOMAIN_OCCUPIED".to_string()))
            }
        }

        async fn status(&self, _target: &Target) -> Result<DomainStatus> {
            Ok(DomainStatus::settled())
        }

        async fn settle(&self, _reference: &str) -> Result<()> {
            Ok(())
        }
    }

    fn targets(names: &[&str]) -> Vec<Target> {
        names.iter().map(|n| Target::parse(n).unwrap()).collect()
    }

    fn orchestrator(remote: DropRemote) -> Orchestrator<DropRemote> {
        Orchestrator::new(Arc::new(RateLimitedClient::with_quota(remote, 10_000)))
    }

    #[test]
    fn test_dispatch_mode_default_and_serde() {
        assert_eq!(DispatchMode::default(), DispatchMode::Concurrent);
        let mode: DispatchMode = serde_yaml::from_str("sequential").unwrap();
        assert_eq!(mode, DispatchMode::Sequential);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_available_targets_claimed_once_each() {
        let orch = orchestrator(DropRemote::available(&["a.se", "b.se", "c.se"]));

        let summary = orch.run(&targets(&["a.se", "b.se", "c.se"]), Instant::now()).await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 3);
        assert!(summary.all_succeeded());
        assert_eq!(orch.client().remote().total_claims(), 3);
        // Each success is one claim plus one status lookup.
        assert_eq!(orch.client().snapshot().calls_this_hour, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sibling_failure_does_not_stop_others() {
        let orch = orchestrator(DropRemote::available(&["a.se", "c.se"])).with_window(Duration::from_secs(10));

        let summary = orch.run(&targets(&["a.se", "b.se", "c.se"]), Instant::now()).await;

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        let names: Vec<_> = summary.results.iter().map(|r| r.target.to_string()).collect();
        assert_eq!(names, vec!["a.se", "b.se", "c.se"]);
        assert!(!summary.results[1].success);
        assert!(matches!(
            summary.results[1].error,
            Some(DropcatchError::DeadlineExceeded { .. })
        ));
        assert_eq!(orch.client().remote().claims_for("a.se"), 1);
        assert_eq!(orch.client().remote().claims_for("c.se"), 1);
        assert!(orch.client().remote().claims_for("b.se") > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_windows_share_release_instant() {
        let orch = orchestrator(DropRemote::default()).with_window(Duration::from_secs(5));
        let released_at = Instant::now();

        let summary = orch.run(&targets(&["a.se", "b.se"]), released_at).await;

        assert_eq!(summary.failed, 2);
        assert_eq!(released_at.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_runs_targets_in_order() {
        let orch = orchestrator(DropRemote::available(&["b.se"]))
            .with_mode(DispatchMode::Sequential)
            .with_window(Duration::from_secs(2));
        let started = Instant::now();

        let summary = orch.run(&targets(&["a.se", "b.se"]), started).await;

        assert_eq!(summary.succeeded, 1);
        let order = orch.client().remote().order.lock().unwrap().clone();
        let first_b = order.iter().position(|(d, _)| d == "b.se").unwrap();
        assert!(order[..first_b].iter().all(|(d, _)| d == "a.se"));
        // b.se only starts once a.se's own window has closed
        assert_eq!(order[first_b].1 - started, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_latch_stops_every_worker() {
        let remote = DropRemote {
            reject_all: Some(Rejection::Unauthorized),
            ..Default::default()
        };
        let orch = orchestrator(remote).with_window(Duration::from_secs(30));

        let summary = orch.run(&targets(&["a.se", "b.se", "c.se"]), Instant::now()).await;

        assert_eq!(summary.failed, 3);
        // Only calls that were already in flight when the latch engaged reach the remote.
        assert!(orch.client().remote().total_claims() <= 3);
        assert_eq!(orch.client().latched(), Some(Rejection::Unauthorized));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_target_list() {
        let orch = orchestrator(DropRemote::default());
        let summary = orch.run(&[], Instant::now()).await;
        assert_eq!(summary.total, 0);
        assert!(summary.all_succeeded());
    }
}
