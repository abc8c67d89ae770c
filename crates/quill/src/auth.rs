// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The auth façade: session store, renewal scheduler and renewal coordinator
//! wired together behind one handle.

use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::api::{
    AuthApi, AuthError, AuthGrant, LoginRequest, NewUser, PasswordChange, Principal,
    ProfileChanges, Registration,
};
use crate::coordinator::{RenewError, RenewalCoordinator};
use crate::error::extract_detail;
use crate::gate::AuthGate;
use crate::scheduler::{ArmPlan, RenewalPolicy, RenewalScheduler};
use crate::session::{ClearReason, Session, SessionEvent, SessionPhase, SessionStore};
use crate::storage::KeyValueStore;
use crate::token::{Clock, Credential, TokenInfo};
use crate::transport::{ApiRequest, ApiResponse};

/// Owns the session for one API and keeps its credential fresh.
pub struct AuthService {
    api: Arc<dyn AuthApi>,
    store: SessionStore,
    scheduler: RenewalScheduler,
    coordinator: RenewalCoordinator,
    clock: Arc<dyn Clock>,
    this: Weak<AuthService>,
}

impl AuthService {
    pub fn new(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        policy: RenewalPolicy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            api,
            store: SessionStore::new(storage, Arc::clone(&clock)),
            scheduler: RenewalScheduler::new(policy),
            coordinator: RenewalCoordinator::new(),
            clock,
            this: this.clone(),
        })
    }

    /// Reload a persisted session. Returns whether one was restored.
    pub fn restore(&self) -> bool {
        match self.store.restore() {
            Some(credential) => {
                self.arm(&credential);
                self.store.current().is_some()
            }
            None => false,
        }
    }

    /// Store a new credential and schedule its renewal.
    ///
    /// A credential already inside the renewal window is cleared at once.
    pub fn adopt(&self, credential: Credential, principal: Option<Principal>) {
        self.store.adopt(credential.clone(), principal);
        self.arm(&credential);
    }

    /// Forget the session and stop the renewal timer.
    pub fn clear(&self, reason: ClearReason) {
        self.scheduler.disarm();
        self.store.clear(reason);
    }

    fn arm(&self, credential: &Credential) {
        let this = self.this.clone();
        let plan = self.scheduler.arm(credential, self.clock.now_ms(), move || async move {
            if let Some(service) = this.upgrade() {
                service.on_timer().await;
            }
        });
        if plan == ArmPlan::Expired {
            info!("token expired or about to expire, logging out");
            self.clear(ClearReason::Expired);
        }
    }

    async fn on_timer(&self) {
        if self.store.current().is_none() {
            return;
        }
        match self.renew().await {
            Ok(_) => debug!("scheduled refresh complete"),
            // The session has already been cleared by the failed renewal.
            Err(e) => warn!(err = %e, "scheduled token refresh failed"),
        }
    }

    /// Renew the credential, joining any renewal already running.
    ///
    /// On success every caller gets the same new credential and the timer is
    /// re-armed; on failure the session is cleared once.
    pub async fn renew(&self) -> Result<Credential, RenewError> {
        // Read before the session check: any clear after this point bumps the
        // generation and makes the renewal's adopt a no-op.
        let generation = self.store.generation();
        if self.store.current().is_none() {
            return Err(RenewError::NoSession);
        }
        let Some(this) = self.this.upgrade() else {
            return Err(RenewError::Aborted("auth service dropped".to_owned()));
        };
        self.coordinator
            .renew_with(move || async move { this.renew_once(generation).await })
            .await
    }

    async fn renew_once(&self, generation: u64) -> Result<Credential, RenewError> {
        let principal = self.store.current_principal();
        info!("refreshing token");

        match self.api.renew_credential().await {
            Ok(AuthGrant { credential, principal: fresh }) => {
                let principal = fresh.or(principal);
                if self.store.adopt_if_current(generation, credential.clone(), principal).is_none() {
                    warn!("session changed during refresh, discarding token");
                    return Err(RenewError::SessionEnded);
                }
                info!("token refresh successful");
                self.arm(&credential);
                Ok(credential)
            }
            Err(e) => {
                warn!(err = %e, "token refresh failed, logging out");
                if self.store.clear_if_current(generation, ClearReason::RenewalFailed).is_some() {
                    self.scheduler.disarm();
                }
                Err(e)
            }
        }
    }

    /// Sign in with email and password.
    ///
    /// A failed login leaves any existing session untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthGrant, AuthError> {
        let request = LoginRequest { email: email.to_owned(), password: password.to_owned() };
        self.store.set_loading(true);
        let result = self.api.login(&request).await;
        if let Ok(ref grant) = result {
            info!(
                username = grant.principal.as_ref().map(|p| p.username.as_str()).unwrap_or(""),
                "login successful"
            );
            self.adopt(grant.credential.clone(), grant.principal.clone());
        }
        self.store.set_loading(false);
        result
    }

    /// Create an account. Signs in only if the server returned a credential.
    pub async fn register(&self, user: &NewUser) -> Result<Registration, AuthError> {
        self.store.set_loading(true);
        let result = self.api.register(user).await;
        if let Ok(Registration { ref principal, credential: Some(ref credential) }) = result {
            self.adopt(credential.clone(), Some(principal.clone()));
        }
        self.store.set_loading(false);
        result
    }

    /// Clear the session locally, then tell the server. A failed server
    /// call is logged and ignored.
    pub async fn logout(&self) {
        self.clear(ClearReason::Logout);
        match self.api.logout_notify().await {
            Ok(()) => info!("logged out from server"),
            Err(e) => warn!(err = %e, "logout notification failed"),
        }
    }

    /// `PUT /auth/update-username` through the gate; the returned user
    /// replaces the session principal.
    pub async fn update_profile(
        &self,
        gate: &AuthGate,
        changes: &ProfileChanges,
    ) -> Result<Principal, AuthError> {
        if self.store.current().is_none() {
            return Err(AuthError::NotSignedIn);
        }
        let request = ApiRequest::put("/auth/update-username")
            .json(changes)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let response = send_checked(gate, request).await?;
        let principal: Principal =
            response.json().map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        self.store.replace_principal(principal.clone());
        Ok(principal)
    }

    pub async fn change_password(
        &self,
        gate: &AuthGate,
        change: &PasswordChange,
    ) -> Result<(), AuthError> {
        if self.store.current().is_none() {
            return Err(AuthError::NotSignedIn);
        }
        let request = ApiRequest::post("/auth/change-password")
            .json(change)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        send_checked(gate, request).await?;
        Ok(())
    }

    /// Look up another user by id.
    pub async fn fetch_user(&self, gate: &AuthGate, user_id: &str) -> Result<Principal, AuthError> {
        let response = send_checked(gate, ApiRequest::get(format!("/auth/users/{user_id}"))).await?;
        response.json().map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn current_principal(&self) -> Option<Principal> {
        self.store.current_principal()
    }

    pub fn current_credential(&self) -> Option<Credential> {
        self.store.current()
    }

    /// Whether `credential` has not expired by this service's clock.
    pub fn is_unexpired(&self, credential: &Credential) -> bool {
        credential.is_valid(self.clock.now_ms())
    }

    pub fn is_loading(&self) -> bool {
        self.store.is_loading()
    }

    pub fn snapshot(&self) -> Session {
        self.store.snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.store.phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.store.subscribe()
    }

    pub fn changes(&self) -> WatchStream<Session> {
        self.store.changes()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.events()
    }

    /// Decoded view of the current credential, `None` when signed out.
    pub fn token_info(&self) -> Option<TokenInfo> {
        let credential = self.store.current()?;
        Some(TokenInfo::inspect(&credential, self.clock.now_ms()))
    }

    pub fn renewal_policy(&self) -> RenewalPolicy {
        self.scheduler.policy()
    }

    pub fn is_renewal_armed(&self) -> bool {
        self.scheduler.is_armed()
    }

    pub fn is_renewing(&self) -> bool {
        self.coordinator.is_in_flight()
    }

    /// Renewal network calls started so far.
    pub fn renewal_calls(&self) -> u64 {
        self.coordinator.calls()
    }

    /// Stop the renewal timer. The session itself is kept.
    pub fn dispose(&self) {
        self.scheduler.disarm();
    }
}

async fn send_checked(gate: &AuthGate, request: ApiRequest) -> Result<ApiResponse, AuthError> {
    let response = gate.send(request).await.map_err(|e| AuthError::Network(e.to_string()))?;
    if !response.is_success() {
        return Err(AuthError::Rejected {
            status: response.status.as_u16(),
            message: extract_detail(&response.body),
        });
    }
    Ok(response)
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
