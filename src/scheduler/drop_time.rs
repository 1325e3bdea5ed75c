//! Drop-time scheduling.
//!
//! Computes the next release instant (a fixed time of day in UTC) and waits
//! for it. Long waits are broken into `recheck_interval` slices, with the
//! trigger recomputed from the wall clock before each slice; only the last
//! stretch, at most one slice long, is slept in one go.

use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;

/// Shortest recheck slice the wait loop will use.
pub const MIN_RECHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Wall-clock source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// What the waiting loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStep {
    /// First shot is due now (or overdue).
    Ready,
    /// Sleep one recheck slice, then recompute.
    Recheck(Duration),
    /// Sleep exactly this long, then fire.
    Final(Duration),
}

/// One evaluation of the schedule against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPlan {
    pub trigger: DateTime<Utc>,
    pub first_shot: DateTime<Utc>,
    pub step: WaitStep,
}

/// Summary of a completed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    pub trigger: DateTime<Utc>,
    pub first_shot: DateTime<Utc>,
    pub rechecks: u32,
    pub final_sleep: Duration,
    /// Waiting was skipped by the start-now override.
    pub immediate: bool,
}

/// Daily release schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropSchedule {
    /// Time of day (UTC) the registrar releases expired domains.
    pub drop_time: NaiveTime,
    /// Fire this much before the drop to offset network latency.
    pub lead: Duration,
    /// Longest single sleep while far from the drop.
    pub recheck_interval: Duration,
}

impl Default for DropSchedule {
    fn default() -> Self {
        Self {
            drop_time: NaiveTime::from_hms_opt(4, 0, 0).unwrap_or(NaiveTime::MIN),
            lead: Duration::from_millis(100),
            recheck_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl DropSchedule {
    pub fn new(drop_time: NaiveTime) -> Self {
        Self {
            drop_time,
            ..Default::default()
        }
    }

    pub fn with_lead(mut self, lead: Duration) -> Self {
        self.lead = lead;
        self
    }

    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    /// Next occurrence of `drop_time` strictly after `now`.
    pub fn next_trigger_instant(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.drop_time).and_utc();
        if now < today { today } else { today + TimeDelta::days(1) }
    }

    /// Trigger instant minus the lead time.
    pub fn first_shot(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.next_trigger_instant(now) - lead_delta(self.lead)
    }

    pub fn plan(&self, now: DateTime<Utc>) -> WaitPlan {
        let trigger = self.next_trigger_instant(now);
        let first_shot = trigger - lead_delta(self.lead);
        let slice = self.recheck_interval.max(MIN_RECHECK_INTERVAL);

        let step = match (first_shot - now).to_std() {
            Ok(remaining) if remaining.is_zero() => WaitStep::Ready,
            Ok(remaining) if remaining <= slice => WaitStep::Final(remaining),
            Ok(_) => WaitStep::Recheck(slice),
            Err(_) => WaitStep::Ready,
        };

        WaitPlan {
            trigger,
            first_shot,
            step,
        }
    }

    /// Sleep until the first shot, re-reading the clock every recheck slice.
    pub async fn wait_for_drop<C: Clock + ?Sized>(&self, clock: &C) -> WaitReport {
        let mut rechecks: u32 = 0;

        loop {
            let plan = self.plan(clock.now());
            match plan.step {
                WaitStep::Ready => {
                    return self.report(plan, rechecks, Duration::ZERO, false);
                }
                WaitStep::Final(remaining) => {
                    tracing::info!(
                        final_sleep_ms = remaining.as_millis() as u64,
                        first_attempt_time = %plan.first_shot.to_rfc3339(),
                        "Final approach to drop time"
                    );
                    sleep(remaining).await;
                    return self.report(plan, rechecks, remaining, false);
                }
                WaitStep::Recheck(slice) => {
                    tracing::info!(
                        sleep_secs = slice.as_secs(),
                        updated_first_attempt_time = %plan.first_shot.to_rfc3339(),
                        "Sleeping and will recheck time"
                    );
                    rechecks = rechecks.saturating_add(1);
                    sleep(slice).await;
                }
            }
        }
    }

    /// Skip waiting entirely.
    pub fn start_now<C: Clock + ?Sized>(&self, clock: &C) -> WaitReport {
        let now = clock.now();
        tracing::info!("Starting immediately, drop time wait skipped");
        WaitReport {
            trigger: now,
            first_shot: now,
            rechecks: 0,
            final_sleep: Duration::ZERO,
            immediate: true,
        }
    }

    fn report(&self, plan: WaitPlan, rechecks: u32, final_sleep: Duration, immediate: bool) -> WaitReport {
        WaitReport {
            trigger: plan.trigger,
            first_shot: plan.first_shot,
            rechecks,
            final_sleep,
            immediate,
        }
    }
}

fn lead_delta(lead: Duration) -> TimeDelta {
    TimeDelta::from_std(lead).unwrap_or(TimeDelta::zero())
}

/// Log a heartbeat every `every` until `stop` is cancelled. Returns the number of beats.
pub fn spawn_keep_awake(every: Duration, stop: CancellationToken) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let period = every.max(Duration::from_millis(1));
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut beats = 0u64;

        tracing::info!(interval_secs = period.as_secs(), "Starting keep-awake routine");
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    tracing::info!(beats, "Stopping keep-awake routine");
                    return beats;
                }
                _ = ticker.tick() => {
                    beats += 1;
                    tracing::debug!(beats, "Keep-awake heartbeat");
                }
            }
        }
    })
}
