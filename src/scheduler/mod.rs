//! Scheduling for the release and everything after it.
//!
//! - **Drop time**: waits for the daily release instant, rechecking the wall
//!   clock on long waits.
//! - **Retry**: per-target fast-retry then exponential backoff, bounded by a
//!   purchasing window.
//! - **Orchestrator**: runs one retry coordinator per target against a shared
//!   rate-limited client.

mod drop_time;
mod orchestrator;
mod retry;

pub use drop_time::{Clock, DropSchedule, MIN_RECHECK_INTERVAL, SystemClock, WaitPlan, WaitReport, WaitStep, spawn_keep_awake};
pub use orchestrator::{DispatchMode, Orchestrator, RunSummary};
pub use retry::{
    AcquisitionResult, BoundedScope, DEFAULT_PURCHASING_WINDOW, MIN_RETRY_DELAY, RetryCoordinator, RetryPhase, RetryPolicy, RetryState,
};
