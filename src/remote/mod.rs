//! Remote registrar boundary.
//!
//! This module provides:
//! - `RemoteService` trait: the three logical operations an acquisition needs
//! - `Rejection`: the authoritative refusals that latch the shared client
//! - `LoopiaRpc`: XML-RPC transport over reqwest
//! - `DryRunRemote`: acknowledges everything without touching the network

pub mod dry_run;
pub mod loopia;
pub mod xmlrpc;

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::target::Target;

pub use dry_run::DryRunRemote;
pub use loopia::{LoopiaConfig, LoopiaRpc};

/// Registrar operations used by one acquisition attempt.
///
/// Implementations must report authentication failures and rate-limit
/// refusals as `DropcatchError::Rejected` so the client can latch; every
/// other failure is treated as transient.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Order the domain, optionally paying with account credit.
    async fn claim(&self, target: &Target, auto_pay: bool) -> Result<()>;

    /// Look up the domain on the account, including any unpaid invoice.
    async fn status(&self, target: &Target) -> Result<DomainStatus>;

    /// Pay an outstanding invoice.
    async fn settle(&self, reference: &str) -> Result<()>;
}

/// Authoritative refusal from the registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unauthorized,
    RateLimited,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Unauthorized => write!(f, "401 Unauthorized"),
            Rejection::RateLimited => write!(f, "429 Too Many Requests"),
        }
    }
}

/// Result of a status query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainStatus {
    /// Invoice reference still waiting for payment, if any.
    pub pending_reference: Option<String>,
}

impl DomainStatus {
    pub fn settled() -> Self {
        Self::default()
    }

    pub fn pending(reference: impl Into<String>) -> Self {
        Self {
            pending_reference: Some(reference.into()),
        }
    }
}
