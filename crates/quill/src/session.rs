// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session store: the current credential, principal and loading flag.
//!
//! State is published on a `watch` channel so new subscribers see the latest
//! value immediately, and every adopt/clear also emits one [`SessionEvent`]
//! on a broadcast channel. A generation counter, bumped by every adopt and
//! clear, lets late writers (a renewal that raced a logout) detect that the
//! session moved on without them.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::api::Principal;
use crate::storage::KeyValueStore;
use crate::token::{Clock, Credential};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const CURRENT_USER_KEY: &str = "current_user";
/// Written by older clients; always wiped, never read.
pub const LEGACY_REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Snapshot of the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub credential: Option<Credential>,
    pub principal: Option<Principal>,
    pub is_loading: bool,
}

/// Lifecycle phase of a [`Session`] at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticated,
    /// Credential held but already past its expiry.
    Expiring,
}

impl Session {
    pub fn phase(&self, now_ms: u64) -> SessionPhase {
        match self.credential {
            None => SessionPhase::Unauthenticated,
            Some(ref c) if c.is_valid(now_ms) => SessionPhase::Authenticated,
            Some(_) => SessionPhase::Expiring,
        }
    }
}

/// Why a session was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    Logout,
    RenewalFailed,
    /// The credential was already inside the renewal window when stored.
    Expired,
}

/// Discrete session changes, one per adopt/clear/profile update.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Adopted { generation: u64 },
    Cleared { generation: u64, reason: ClearReason },
    PrincipalUpdated,
}

/// Holds the session and mirrors it into a [`KeyValueStore`].
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state_tx: watch::Sender<Session>,
    event_tx: broadcast::Sender<SessionEvent>,
    /// Serialises adopt/clear and guards the generation check-and-set.
    generation: Mutex<u64>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let (state_tx, _) = watch::channel(Session::default());
        let (event_tx, _) = broadcast::channel(64);
        Self { storage, clock, state_tx, event_tx, generation: Mutex::new(0) }
    }

    /// Load a persisted session if it is still valid, else wipe storage.
    ///
    /// Returns the restored credential. A missing or expired session is the
    /// normal state for a fresh start and is not an error.
    pub fn restore(&self) -> Option<Credential> {
        let token = self.storage.get(ACCESS_TOKEN_KEY);
        let user = self.storage.get(CURRENT_USER_KEY);

        let restored = match (token, user) {
            (Some(token), Some(user)) => {
                let credential = Credential::new(token);
                if !credential.is_valid(self.clock.now_ms()) {
                    None
                } else {
                    match serde_json::from_str::<Principal>(&user) {
                        Ok(principal) => Some((credential, principal)),
                        Err(e) => {
                            warn!("discarding unreadable stored user: {e}");
                            None
                        }
                    }
                }
            }
            _ => None,
        };

        match restored {
            Some((credential, principal)) => {
                info!(username = %principal.username, "loading stored authentication");
                self.adopt(credential.clone(), Some(principal));
                Some(credential)
            }
            None => {
                debug!("no valid stored authentication found");
                self.wipe_storage();
                None
            }
        }
    }

    /// Store a new credential (and principal), persist it, notify.
    ///
    /// Returns the new generation.
    pub fn adopt(&self, credential: Credential, principal: Option<Principal>) -> u64 {
        let mut generation = self.generation.lock();
        self.apply_adopt(&mut generation, credential, principal)
    }

    /// [`adopt`](Self::adopt) only if no adopt/clear happened since `expected`.
    pub fn adopt_if_current(
        &self,
        expected: u64,
        credential: Credential,
        principal: Option<Principal>,
    ) -> Option<u64> {
        let mut generation = self.generation.lock();
        if *generation != expected {
            debug!(expected, current = *generation, "session changed, dropping stale adopt");
            return None;
        }
        Some(self.apply_adopt(&mut generation, credential, principal))
    }

    fn apply_adopt(
        &self,
        generation: &mut u64,
        credential: Credential,
        principal: Option<Principal>,
    ) -> u64 {
        *generation += 1;
        self.storage.set(ACCESS_TOKEN_KEY, credential.as_str());
        match principal {
            Some(ref p) => match serde_json::to_string(p) {
                Ok(json) => self.storage.set(CURRENT_USER_KEY, &json),
                Err(e) => warn!("failed to serialize user: {e}"),
            },
            None => self.storage.remove(CURRENT_USER_KEY),
        }
        self.state_tx.send_modify(|s| {
            s.credential = Some(credential);
            s.principal = principal;
        });
        let _ = self.event_tx.send(SessionEvent::Adopted { generation: *generation });
        *generation
    }

    /// Forget the session everywhere. Idempotent; always notifies.
    pub fn clear(&self, reason: ClearReason) -> u64 {
        let mut generation = self.generation.lock();
        self.apply_clear(&mut generation, reason)
    }

    /// [`clear`](Self::clear) only if no adopt/clear happened since `expected`.
    pub fn clear_if_current(&self, expected: u64, reason: ClearReason) -> Option<u64> {
        let mut generation = self.generation.lock();
        if *generation != expected {
            debug!(expected, current = *generation, "session changed, skipping clear");
            return None;
        }
        Some(self.apply_clear(&mut generation, reason))
    }

    fn apply_clear(&self, generation: &mut u64, reason: ClearReason) -> u64 {
        *generation += 1;
        self.wipe_storage();
        self.state_tx.send_modify(|s| {
            s.credential = None;
            s.principal = None;
        });
        let _ = self.event_tx.send(SessionEvent::Cleared { generation: *generation, reason });
        debug!(?reason, generation = *generation, "session cleared");
        *generation
    }

    fn wipe_storage(&self) {
        self.storage.remove(ACCESS_TOKEN_KEY);
        self.storage.remove(CURRENT_USER_KEY);
        self.storage.remove(LEGACY_REFRESH_TOKEN_KEY);
    }

    /// Replace the principal of the current session (profile edits).
    ///
    /// Ignored when signed out.
    pub fn replace_principal(&self, principal: Principal) -> bool {
        let _generation = self.generation.lock();
        if self.state_tx.borrow().credential.is_none() {
            return false;
        }
        match serde_json::to_string(&principal) {
            Ok(json) => self.storage.set(CURRENT_USER_KEY, &json),
            Err(e) => warn!("failed to serialize user: {e}"),
        }
        self.state_tx.send_modify(|s| s.principal = Some(principal));
        let _ = self.event_tx.send(SessionEvent::PrincipalUpdated);
        true
    }

    pub fn set_loading(&self, loading: bool) {
        self.state_tx.send_if_modified(|s| {
            let changed = s.is_loading != loading;
            s.is_loading = loading;
            changed
        });
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    pub fn current(&self) -> Option<Credential> {
        self.state_tx.borrow().credential.clone()
    }

    pub fn current_principal(&self) -> Option<Principal> {
        self.state_tx.borrow().principal.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state_tx.borrow().is_loading
    }

    /// Credential present and not yet expired.
    pub fn is_authenticated(&self) -> bool {
        let now = self.clock.now_ms();
        self.state_tx.borrow().credential.as_ref().is_some_and(|c| c.is_valid(now))
    }

    pub fn snapshot(&self) -> Session {
        self.state_tx.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state_tx.borrow().phase(self.clock.now_ms())
    }

    /// Latest-value subscription.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state_tx.subscribe()
    }

    /// Stream of session snapshots, starting with the current one.
    pub fn changes(&self) -> WatchStream<Session> {
        WatchStream::new(self.state_tx.subscribe())
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
