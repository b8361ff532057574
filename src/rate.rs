//! Rate governor: gates remote calls on the remaining request budget.
//!
//! The sync engine calls [`RateGovernor::gate`] before every batch of remote
//! calls. When the remaining budget is below the low-water mark the governor
//! blocks until the reported reset time. Retries are not handled here.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cancel::CancelToken;
use crate::remote::{RateBudget, RemoteSource};
use crate::Result;

/// Extra wait after the reported reset so the budget is really refilled.
const RESET_MARGIN: Duration = Duration::from_secs(1);

/// Budget gate shared by all remote-touching operations of one run.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    low_water_mark: u64,
    poll_interval: Duration,
    cancel: CancelToken,
}

impl RateGovernor {
    pub fn new(low_water_mark: u64, poll_interval: Duration, cancel: CancelToken) -> Self {
        Self {
            low_water_mark,
            poll_interval,
            cancel,
        }
    }

    pub fn low_water_mark(&self) -> u64 {
        self.low_water_mark
    }

    /// Query the remaining budget and reset time.
    pub fn check_budget<R: RemoteSource + ?Sized>(&self, remote: &R) -> Result<RateBudget> {
        let budget = remote.rate_budget()?;
        tracing::debug!(
            remaining = budget.remaining,
            limit = budget.limit,
            reset_at = %budget.reset_at,
            "rate budget"
        );
        Ok(budget)
    }

    /// Block until `reset_at`, or for one poll interval if it already passed.
    pub fn wait_until_reset(&self, reset_at: DateTime<Utc>) -> Result<()> {
        let wait = reset_wait(reset_at, Utc::now(), self.poll_interval);
        tracing::warn!(
            reset_at = %reset_at,
            wait_secs = wait.as_secs(),
            "rate limit low, waiting for reset"
        );
        self.cancel.sleep(wait)
    }

    /// Return once the budget is at or above the low-water mark.
    pub fn gate<R: RemoteSource + ?Sized>(&self, remote: &R) -> Result<()> {
        loop {
            self.cancel.check()?;
            let budget = self.check_budget(remote)?;
            if budget.remaining >= self.low_water_mark {
                return Ok(());
            }
            self.wait_until_reset(budget.reset_at)?;
        }
    }
}

/// How long to wait for a reset at `reset_at` seen from `now`.
pub fn reset_wait(reset_at: DateTime<Utc>, now: DateTime<Utc>, poll_interval: Duration) -> Duration {
    match (reset_at - now).to_std() {
        Ok(until) if !until.is_zero() => until + RESET_MARGIN,
        _ => poll_interval,
    }
}
