// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential renewal.
//!
//! Every caller that needs a renewal while one is already running joins the
//! running one instead of starting another. The network work runs in its own
//! task, so it finishes (and its outcome is applied) even if every waiter
//! goes away.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::token::Credential;

/// Why a renewal did not produce a credential. Shared by all waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewError {
    /// The renewal endpoint could not be reached.
    Network(String),
    /// The server refused the renewal (renewal cookie missing or expired).
    Rejected { status: u16 },
    /// The server answered 2xx with an unusable body.
    InvalidResponse(String),
    /// There is no session to renew.
    NoSession,
    /// The session was cleared or replaced while the renewal was running.
    SessionEnded,
    /// The renewal task died before finishing.
    Aborted(String),
}

impl fmt::Display for RenewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "network error: {e}"),
            Self::Rejected { status } => write!(f, "renewal rejected ({status})"),
            Self::InvalidResponse(e) => write!(f, "invalid renewal response: {e}"),
            Self::NoSession => f.write_str("no session to renew"),
            Self::SessionEnded => f.write_str("session ended during renewal"),
            Self::Aborted(e) => write!(f, "renewal aborted: {e}"),
        }
    }
}

impl std::error::Error for RenewError {}

/// Handle to a renewal outcome; clone it to wait on the same renewal.
pub type SharedRenewal = Shared<BoxFuture<'static, Result<Credential, RenewError>>>;

struct InFlight {
    id: u64,
    result: SharedRenewal,
}

/// Guarded get-or-create over the one in-flight renewal.
#[derive(Default)]
pub struct RenewalCoordinator {
    slot: Arc<Mutex<Option<InFlight>>>,
    next_id: AtomicU64,
    calls: AtomicU64,
}

impl RenewalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the running renewal, or start one with `start`.
    ///
    /// `start` is only invoked when nothing is in flight. The slot is emptied
    /// before the outcome becomes visible to any waiter, so a call made after
    /// a renewal settled always starts a fresh one.
    pub fn renew_with<F, Fut>(&self, start: F) -> SharedRenewal
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Credential, RenewError>> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if let Some(ref in_flight) = *slot {
            debug!(id = in_flight.id, "joining in-flight renewal");
            return in_flight.result.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(id, "starting renewal");

        let work = start();
        let task_slot = Arc::clone(&self.slot);
        let handle = tokio::spawn(async move {
            let result = work.await;
            release(&task_slot, id);
            result
        });

        let join_slot = Arc::clone(&self.slot);
        let result = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    release(&join_slot, id);
                    Err(RenewError::Aborted(e.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(InFlight { id, result: result.clone() });
        result
    }

    pub fn is_in_flight(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Number of renewals started (joins are not counted).
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Empty the slot if it still holds renewal `id`.
fn release(slot: &Mutex<Option<InFlight>>, id: u64) {
    let mut slot = slot.lock();
    if slot.as_ref().is_some_and(|f| f.id == id) {
        *slot = None;
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
