//! Loopia XML-RPC transport
//!
//! Implements `RemoteService` against the Loopia API. Credentials are
//! prepended to every call as the first two parameters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::{DropcatchError, Result};
use crate::remote::xmlrpc::{Param, Reply, decode_reply, encode_call};
use crate::remote::{DomainStatus, Rejection, RemoteService};
use crate::target::Target;

/// Loopia API endpoint
pub const LOOPIA_ENDPOINT: &str = "https://api.loopia.se/RPCSERV";

/// Struct member of `getDomain` carrying the unpaid invoice reference
const REFERENCE_MEMBER: &str = "reference_no";

/// Configuration for the Loopia transport
#[derive(Debug, Clone)]
pub struct LoopiaConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for LoopiaConfig {
    fn default() -> Self {
        Self {
            endpoint: LOOPIA_ENDPOINT.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Loopia API client
pub struct LoopiaRpc {
    client: Client,
    username: String,
    password: String,
    config: LoopiaConfig,
}

impl LoopiaRpc {
    /// Create a client with explicit credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>, config: LoopiaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DropcatchError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            username: username.into(),
            password: password.into(),
            config,
        })
    }

    /// Send one method call and decode the reply
    async fn call(&self, method: &str, params: &[Param<'_>]) -> Result<Reply> {
        let mut all = Vec::with_capacity(params.len() + 2);
        all.push(Param::Str(&self.username));
        all.push(Param::Str(&self.password));
        all.extend_from_slice(params);

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "text/xml")
            .body(encode_call(method, &all))
            .send()
            .await?;

        if let Some(err) = status_code_error(response.status()) {
            return Err(err);
        }

        let body = response.text().await?;
        match decode_reply(&body)? {
            Reply::Fault { code, message } => Err(DropcatchError::RemoteStatus(format!(
                "fault {}: {}",
                code, message
            ))),
            reply => Ok(reply),
        }
    }
}

/// Map an HTTP status to an error, if it is one.
fn status_code_error(status: StatusCode) -> Option<DropcatchError> {
    match status {
        StatusCode::UNAUTHORIZED => Some(DropcatchError::Rejected(Rejection::Unauthorized)),
        StatusCode::TOO_MANY_REQUESTS => Some(DropcatchError::Rejected(Rejection::RateLimited)),
        s if !s.is_success() => Some(DropcatchError::Transport(format!("HTTP {}", s))),
        _ => None,
    }
}

/// Interpret an API status string. `OK` is the only success.
fn api_status(status: &str) -> Result<()> {
    match status {
        "OK" => Ok(()),
        "AUTH_ERROR" => Err(DropcatchError::Rejected(Rejection::Unauthorized)),
        "RATE_LIMITED" => Err(DropcatchError::Rejected(Rejection::RateLimited)),
        other => Err(DropcatchError::RemoteStatus(other.to_string())),
    }
}

fn expect_ok(method: &str, reply: Reply) -> Result<()> {
    match reply {
        Reply::String(status) => api_status(&status),
        other => Err(DropcatchError::MalformedResponse(format!(
            "{} returned {:?}",
            method, other
        ))),
    }
}

fn domain_status(reply: Reply) -> Result<DomainStatus> {
    match reply {
        Reply::Struct(_) => {
            let reference = reply
                .member(REFERENCE_MEMBER)
                .filter(|r| !r.is_empty())
                .map(str::to_string);
            Ok(DomainStatus {
                pending_reference: reference,
            })
        }
        Reply::String(status) => {
            api_status(&status)?;
            Err(DropcatchError::MalformedResponse(
                "getDomain returned a bare OK instead of a struct".to_string(),
            ))
        }
        other => Err(DropcatchError::MalformedResponse(format!(
            "unexpected response format from getDomain: {:?}",
            other
        ))),
    }
}

#[async_trait]
impl RemoteService for LoopiaRpc {
    async fn claim(&self, target: &Target, auto_pay: bool) -> Result<()> {
        let reply = self
            .call("orderDomain", &[Param::Str(target.as_str()), Param::Bool(auto_pay)])
            .await?;
        expect_ok("orderDomain", reply)
    }

    async fn status(&self, target: &Target) -> Result<DomainStatus> {
        let reply = self.call("getDomain", &[Param::Str(target.as_str())]).await?;
        domain_status(reply)
    }

    async fn settle(&self, reference: &str) -> Result<()> {
        let reply = self
            .call("payInvoiceUsingCredits", &[Param::Str(reference)])
            .await?;
        expect_ok("payInvoiceUsingCredits", reply)
    }
}

impl std::fmt::Debug for LoopiaRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopiaRpc")
            .field("endpoint", &self.config.endpoint)
            .field("username", &self.username)
            .finish()
    }
}
