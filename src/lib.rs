//! Dropcatch - register expiring domains the moment the registrar releases them
//!
//! At the daily drop time every target is claimed through a single
//! rate-limited client, retrying fast at first and then with exponential
//! backoff until the target is won or its purchasing window closes.

pub mod acquire;
pub mod client;
pub mod error;
pub mod remote;
pub mod scheduler;
pub mod target;

pub use client::RateLimitedClient;
pub use error::{DropcatchError, Result};
pub use target::Target;
