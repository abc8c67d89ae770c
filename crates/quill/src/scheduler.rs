// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive renewal timer.
//!
//! One timer at a time: arming always cancels the previous timer first. The
//! scheduler only decides *when*; what happens on fire is the caller's
//! callback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::token::Credential;

pub const DEFAULT_RENEWAL_LEAD: Duration = Duration::from_secs(300);
pub const DEFAULT_RENEWAL_MIN_DELAY: Duration = Duration::from_secs(60);

/// How far ahead of expiry to renew, and the shortest delay worth arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    pub lead: Duration,
    pub min_delay: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self { lead: DEFAULT_RENEWAL_LEAD, min_delay: DEFAULT_RENEWAL_MIN_DELAY }
    }
}

/// Outcome of planning a timer for a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmPlan {
    /// Fire after this delay.
    Arm(Duration),
    /// The renewal point is closer than the minimum delay. Nothing is armed
    /// and the session is kept; a 401 will drive renewal instead.
    TooClose(Duration),
    /// Already inside the renewal window, or undecodable.
    Expired,
}

impl RenewalPolicy {
    pub fn plan(&self, credential: &Credential, now_ms: u64) -> ArmPlan {
        let Some(remaining) = credential.millis_until_expiry(now_ms) else {
            return ArmPlan::Expired;
        };
        let lead_ms = i64::try_from(self.lead.as_millis()).unwrap_or(i64::MAX);
        let fire_in = remaining.saturating_sub(lead_ms);
        if fire_in <= 0 {
            return ArmPlan::Expired;
        }
        // fire_in > 0 here.
        let fire_in = Duration::from_millis(fire_in.unsigned_abs());
        if fire_in <= self.min_delay {
            ArmPlan::TooClose(fire_in)
        } else {
            ArmPlan::Arm(fire_in)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed { fire_at_ms: u64 },
    Fired,
}

struct Inner {
    state: SchedulerState,
    timer: Option<CancellationToken>,
    /// Bumped on every arm/disarm; a timer only acts if its epoch is current.
    epoch: u64,
}

/// Owns the single renewal timer task.
pub struct RenewalScheduler {
    policy: RenewalPolicy,
    inner: Arc<Mutex<Inner>>,
}

impl RenewalScheduler {
    pub fn new(policy: RenewalPolicy) -> Self {
        Self {
            policy,
            inner: Arc::new(Mutex::new(Inner { state: SchedulerState::Idle, timer: None, epoch: 0 })),
        }
    }

    pub fn policy(&self) -> RenewalPolicy {
        self.policy
    }

    /// Cancel any timer, then arm one for `credential` if the plan allows.
    ///
    /// `on_fire` runs in the timer task once the delay elapses, unless the
    /// timer was cancelled first. Returns the plan that was applied.
    pub fn arm<F, Fut>(&self, credential: &Credential, now_ms: u64, on_fire: F) -> ArmPlan
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let plan = self.policy.plan(credential, now_ms);
        let mut inner = self.inner.lock();
        cancel(&mut inner);

        let delay = match plan {
            ArmPlan::Arm(delay) => delay,
            ArmPlan::TooClose(delay) => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                debug!(delay_ms, "renewal point too close, not arming");
                return plan;
            }
            ArmPlan::Expired => {
                debug!("credential inside renewal window, not arming");
                return plan;
            }
        };

        let token = CancellationToken::new();
        let epoch = inner.epoch;
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let fire_at_ms = now_ms.saturating_add(delay_ms);
        inner.timer = Some(token.clone());
        inner.state = SchedulerState::Armed { fire_at_ms };
        info!(minutes = delay.as_secs() / 60, "token refresh scheduled");

        let shared = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return,
            }
            {
                let mut inner = shared.lock();
                if inner.epoch != epoch {
                    return;
                }
                inner.state = SchedulerState::Fired;
                inner.timer = None;
            }
            debug!("renewal timer fired");
            on_fire().await;
        });
        plan
    }

    /// Cancel the timer and return to idle.
    pub fn disarm(&self) {
        let mut inner = self.inner.lock();
        cancel(&mut inner);
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state(), SchedulerState::Armed { .. })
    }
}

fn cancel(inner: &mut Inner) {
    if let Some(timer) = inner.timer.take() {
        timer.cancel();
    }
    inner.epoch += 1;
    inner.state = SchedulerState::Idle;
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
