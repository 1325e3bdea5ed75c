//! One acquisition attempt: order the domain, then settle any invoice.
//!
//! Settlement is only ever attempted after a successful claim within the
//! same attempt. The first failure ends the attempt.

use std::time::Duration;

use tokio::time::Instant;

use crate::client::RateLimitedClient;
use crate::error::{DropcatchError, Result};
use crate::remote::RemoteService;
use crate::target::Target;

/// Pay for the order with account credit.
const AUTO_PAY: bool = true;

/// Classification of a finished attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Retryable,
    Fatal,
}

impl AttemptOutcome {
    pub fn of(result: &Result<()>) -> Self {
        match result {
            Ok(()) => AttemptOutcome::Success,
            Err(err) if err.is_fatal() => AttemptOutcome::Fatal,
            Err(_) => AttemptOutcome::Retryable,
        }
    }
}

/// Bookkeeping for one iteration of a retry loop. Logged, then dropped.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub sequence: u32,
    pub started_at: Instant,
    pub outcome: AttemptOutcome,
    pub duration: Duration,
}

impl AttemptRecord {
    pub fn finish(sequence: u32, started_at: Instant, result: &Result<()>) -> Self {
        Self {
            sequence,
            started_at,
            outcome: AttemptOutcome::of(result),
            duration: started_at.elapsed(),
        }
    }
}

/// Try to register and pay for `target` once.
pub async fn attempt<R: RemoteService>(client: &RateLimitedClient<R>, target: &Target) -> Result<()> {
    if let Some(rejection) = client.latched() {
        tracing::error!(
            domain = %target,
            cause = %rejection,
            "Aborting attempt due to previous rejection"
        );
        return Err(DropcatchError::Latched(rejection));
    }

    if let Err(err) = client.claim(target, AUTO_PAY).await {
        tracing::error!(domain = %target, error = %err, "Registration attempt failed at order step");
        return Err(err);
    }

    if let Err(err) = settle_if_pending(client, target).await {
        tracing::error!(domain = %target, error = %err, "Registration attempt failed at payment step");
        return Err(err);
    }

    tracing::info!(domain = %target, "Complete registration attempt successful");
    Ok(())
}

async fn settle_if_pending<R: RemoteService>(client: &RateLimitedClient<R>, target: &Target) -> Result<()> {
    let status = client.status(target).await?;

    match status.pending_reference {
        Some(reference) => {
            tracing::info!(domain = %target, reference = %reference, "Paying invoice");
            client.settle(&reference).await
        }
        None => {
            tracing::info!(domain = %target, "No invoice to pay");
            Ok(())
        }
    }
}
