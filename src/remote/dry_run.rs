//! Dry-run remote: every call succeeds immediately and nothing leaves the process.

use async_trait::async_trait;

use crate::error::Result;
use crate::remote::{DomainStatus, RemoteService};
use crate::target::Target;

#[derive(Debug, Clone, Default)]
pub struct DryRunRemote;

impl DryRunRemote {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteService for DryRunRemote {
    async fn claim(&self, target: &Target, auto_pay: bool) -> Result<()> {
        tracing::info!(method = "orderDomain", domain = %target, auto_pay, "[DRY-RUN] call simulated");
        Ok(())
    }

    async fn status(&self, target: &Target) -> Result<DomainStatus> {
        tracing::info!(method = "getDomain", domain = %target, "[DRY-RUN] call simulated");
        Ok(DomainStatus::settled())
    }

    async fn settle(&self, reference: &str) -> Result<()> {
        tracing::info!(method = "payInvoiceUsingCredits", reference, "[DRY-RUN] call simulated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_acknowledges_everything() {
        let remote = DryRunRemote::new();
        let target = Target::parse("example.se").unwrap();

        assert!(remote.claim(&target, true).await.is_ok());
        assert_eq!(remote.status(&target).await.unwrap(), DomainStatus::settled());
        assert!(remote.settle("INV-1").await.is_ok());
    }
}
