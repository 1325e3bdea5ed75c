//! Rate-limited, latching client shared by every acquisition worker.
//!
//! All calls to the registrar go through one `RateLimitedClient`. It keeps a
//! per-hour call budget and latches permanently the first time the
//! registrar rejects the credentials or the call rate. Once latched, no
//! call leaves the process for the rest of the client's life.
//!
//! The counter, window start and latch live in a single mutex-guarded
//! `ClientState`; every check-and-update happens under one lock acquisition.
//! The remote call itself runs outside the lock, so calls from different
//! workers may be in flight at the same time once their slot is reserved.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{DropcatchError, Result};
use crate::remote::{DomainStatus, Rejection, RemoteService};
use crate::target::Target;

/// Calls allowed per hour by the reference policy
pub const DEFAULT_HOURLY_QUOTA: u32 = 60;

/// Length of the quota window
pub const QUOTA_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
struct ClientState {
    calls_this_hour: u32,
    hour_window_start: Instant,
    latched: Option<Rejection>,
}

/// Point-in-time copy of the client bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub calls_this_hour: u32,
    pub hour_window_start: Instant,
    pub latched: Option<Rejection>,
}

/// Remote client with hourly quota and permanent fault latch.
#[derive(Debug)]
pub struct RateLimitedClient<R> {
    remote: R,
    quota: u32,
    window: Duration,
    state: Mutex<ClientState>,
}

impl<R: RemoteService> RateLimitedClient<R> {
    pub fn new(remote: R) -> Self {
        Self::with_quota(remote, DEFAULT_HOURLY_QUOTA)
    }

    pub fn with_quota(remote: R, quota: u32) -> Self {
        Self {
            remote,
            quota,
            window: QUOTA_WINDOW,
            state: Mutex::new(ClientState {
                calls_this_hour: 0,
                hour_window_start: Instant::now(),
                latched: None,
            }),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        let state = self.lock_state();
        ClientSnapshot {
            calls_this_hour: state.calls_this_hour,
            hour_window_start: state.hour_window_start,
            latched: state.latched,
        }
    }

    /// The rejection that latched the client, if any.
    pub fn latched(&self) -> Option<Rejection> {
        self.lock_state().latched
    }

    /// Order a domain.
    pub async fn claim(&self, target: &Target, auto_pay: bool) -> Result<()> {
        self.invoke("orderDomain", target.as_str(), |remote| {
            remote.claim(target, auto_pay)
        })
        .await
    }

    /// Query a domain for an unpaid invoice.
    pub async fn status(&self, target: &Target) -> Result<DomainStatus> {
        self.invoke("getDomain", target.as_str(), |remote| remote.status(target))
            .await
    }

    /// Pay an invoice using account credit.
    pub async fn settle(&self, reference: &str) -> Result<()> {
        self.invoke("payInvoiceUsingCredits", reference, |remote| {
            remote.settle(reference)
        })
        .await
    }

    /// Reserve a quota slot, perform the call, latch on authoritative rejection.
    async fn invoke<'a, T, F, Fut>(&'a self, method: &'static str, subject: &str, call: F) -> Result<T>
    where
        F: FnOnce(&'a R) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let call_number = self.reserve(method)?;

        tracing::info!(
            method,
            subject,
            calls_this_hour = call_number,
            "Sending API request"
        );

        let started = Instant::now();
        let outcome = call(&self.remote).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => {
                tracing::info!(method, subject, duration_ms, "API call successful");
            }
            Err(err) => {
                tracing::error!(method, subject, duration_ms, error = %err, "API call failed");
                if let Some(rejection) = err.authoritative_rejection() {
                    self.latch(rejection, method);
                }
            }
        }

        outcome
    }

    /// Atomic check-and-increment. Returns the call's number within the window.
    fn reserve(&self, method: &'static str) -> Result<u32> {
        let mut state = self.lock_state();

        if let Some(rejection) = state.latched {
            tracing::warn!(method, cause = %rejection, "Client latched; refusing API call");
            return Err(DropcatchError::Latched(rejection));
        }

        let now = Instant::now();
        if now.duration_since(state.hour_window_start) >= self.window {
            tracing::info!(
                previous_hour_calls = state.calls_this_hour,
                "Resetting API call counter for new hour"
            );
            state.calls_this_hour = 0;
            state.hour_window_start = now;
        }

        if state.calls_this_hour >= self.quota {
            let resets_in = self
                .window
                .saturating_sub(now.duration_since(state.hour_window_start));
            tracing::error!(
                method,
                calls_this_hour = state.calls_this_hour,
                quota = self.quota,
                resets_in_secs = resets_in.as_secs(),
                "API call limit reached"
            );
            return Err(DropcatchError::QuotaExceeded { quota: self.quota });
        }

        state.calls_this_hour += 1;
        Ok(state.calls_this_hour)
    }

    fn latch(&self, rejection: Rejection, method: &'static str) {
        let mut state = self.lock_state();
        if state.latched.is_none() {
            state.latched = Some(rejection);
            tracing::error!(
                method,
                cause = %rejection,
                "Authoritative rejection received; stopping further API calls"
            );
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        // Every mutation is a plain field store, so a poisoned guard still holds consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Remote that answers every call with a fixed outcome.
    #[derive(Default)]
    struct FixedRemote {
        reject_with: Option<Rejection>,
        calls: AtomicU32,
    }

    impl FixedRemote {
        fn rejecting(rejection: Rejection) -> Self {
            Self {
                reject_with: Some(rejection),
                calls: AtomicU32::new(0),
            }
        }

        fn outcome(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reject_with {
                Some(rejection) => Err(DropcatchError::Rejected(rejection)),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl RemoteService for FixedRemote {
        async fn claim(&self, _target: &Target, _auto_pay: bool) -> Result<()> {
            self.outcome()
        }

        async fn status(&self, _target: &Target) -> Result<DomainStatus> {
            self.outcome().map(|_| DomainStatus::settled())
        }

        async fn settle(&self, _reference: &str) -> Result<()> {
            self.outcome()
        }
    }

    fn target() -> Target {
        Target::parse("example.se").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_does_not_increment() {
        let client = RateLimitedClient::with_quota(FixedRemote::default(), 3);

        for _ in 0..3 {
            client.claim(&target(), true).await.unwrap();
        }
        assert_eq!(client.snapshot().calls_this_hour, 3);

        let err = client.claim(&target(), true).await.unwrap_err();
        assert!(matches!(err, DropcatchError::QuotaExceeded { quota: 3 }));
        assert_eq!(client.snapshot().calls_this_hour, 3);
        assert_eq!(client.remote().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_restores_budget() {
        let client = RateLimitedClient::with_quota(FixedRemote::default(), 2);
        client.claim(&target(), true).await.unwrap();
        client.claim(&target(), true).await.unwrap();
        assert!(client.claim(&target(), true).await.is_err());

        let before = client.snapshot().hour_window_start;
        tokio::time::advance(QUOTA_WINDOW).await;

        client.claim(&target(), true).await.unwrap();
        let snapshot = client.snapshot();
        assert_eq!(snapshot.calls_this_hour, 1);
        assert!(snapshot.hour_window_start > before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_not_reset_before_an_hour() {
        let client = RateLimitedClient::with_quota(FixedRemote::default(), 1);
        client.claim(&target(), true).await.unwrap();

        tokio::time::advance(QUOTA_WINDOW - Duration::from_secs(1)).await;
        assert!(matches!(
            client.claim(&target(), true).await,
            Err(DropcatchError::QuotaExceeded { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_latches_permanently() {
        let client = RateLimitedClient::new(FixedRemote::rejecting(Rejection::Unauthorized));

        let first = client.claim(&target(), true).await.unwrap_err();
        assert!(matches!(first, DropcatchError::Rejected(Rejection::Unauthorized)));
        assert_eq!(client.latched(), Some(Rejection::Unauthorized));

        let second = client.status(&target()).await.unwrap_err();
        assert!(matches!(second, DropcatchError::Latched(Rejection::Unauthorized)));

        // Window reset does not clear the latch
        tokio::time::advance(QUOTA_WINDOW * 2).await;
        let third = client.settle("INV-1").await.unwrap_err();
        assert!(matches!(third, DropcatchError::Latched(Rejection::Unauthorized)));

        assert_eq!(client.remote().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latched_call_consumes_no_quota() {
        let client = RateLimitedClient::new(FixedRemote::rejecting(Rejection::RateLimited));
        let _ = client.claim(&target(), true).await;
        let _ = client.claim(&target(), true).await;
        let _ = client.claim(&target(), true).await;
        assert_eq!(client.snapshot().calls_this_hour, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_does_not_latch() {
        struct FlakyRemote;

        #[async_trait]
        impl RemoteService for FlakyRemote {
            async fn claim(&self, _target: &Target, _auto_pay: bool) -> Result<()> {
                Err(DropcatchError::Transport("connection reset".to_string()))
            }
            async fn status(&self, _target: &Target) -> Result<DomainStatus> {
                Err(DropcatchError::MalformedResponse("not a struct".to_string()))
            }
            async fn settle(&self, _reference: &str) -> Result<()> {
                Ok(())
            }
        }

        let client = RateLimitedClient::new(FlakyRemote);
        assert!(client.claim(&target(), true).await.is_err());
        assert!(client.status(&target()).await.is_err());
        assert!(client.latched().is_none());
        assert!(client.settle("INV-1").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_exceed_quota() {
        let client = std::sync::Arc::new(RateLimitedClient::with_quota(FixedRemote::default(), 10));

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.claim(&target(), true).await.is_ok() })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(client.snapshot().calls_this_hour, 10);
        assert_eq!(client.remote().calls.load(Ordering::SeqCst), 10);
    }
}
