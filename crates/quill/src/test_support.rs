// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token minting, fakes, and assertion helpers.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::json;

use crate::api::{AuthApi, AuthError, AuthGrant, LoginRequest, NewUser, Principal, Registration};
use crate::auth::AuthService;
use crate::coordinator::RenewError;
use crate::scheduler::RenewalPolicy;
use crate::storage::MemoryStore;
use crate::token::{Clock, Credential, ManualClock};
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

/// A fixed "now" for tests: 2023-11-14T22:13:20Z.
pub const T0_MS: u64 = 1_700_000_000_000;

/// An unsigned credential whose payload is `{"exp": exp_secs}`.
pub fn mint_token(exp_secs: u64) -> Credential {
    mint_token_with(json!({ "exp": exp_secs }))
}

/// An unsigned credential carrying `claims` as its payload.
pub fn mint_token_with(claims: serde_json::Value) -> Credential {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    Credential::new(format!("{header}.{payload}.sig"))
}

pub fn principal(username: &str) -> Principal {
    Principal {
        object_id: Some(format!("id-{username}")),
        username: username.to_owned(),
        email: format!("{username}@example.com"),
        ..Principal::default()
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// In-memory [`AuthApi`] issuing credentials relative to a [`ManualClock`].
///
/// Every renewal mints a distinct credential valid for `ttl`.
pub struct FakeAuthApi {
    clock: Arc<ManualClock>,
    ttl: Mutex<Duration>,
    renew_delay: Mutex<Duration>,
    renew_failure: Mutex<Option<RenewError>>,
    login_failure: Mutex<Option<AuthError>>,
    logout_failure: Mutex<Option<AuthError>>,
    token_on_register: AtomicBool,
    renew_user: Mutex<Option<Principal>>,
    serial: AtomicU64,
    pub login_calls: AtomicU32,
    pub register_calls: AtomicU32,
    pub renew_calls: AtomicU32,
    pub logout_calls: AtomicU32,
}

impl FakeAuthApi {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            ttl: Mutex::new(Duration::from_secs(3600)),
            renew_delay: Mutex::new(Duration::ZERO),
            renew_failure: Mutex::new(None),
            login_failure: Mutex::new(None),
            logout_failure: Mutex::new(None),
            token_on_register: AtomicBool::new(false),
            renew_user: Mutex::new(None),
            serial: AtomicU64::new(0),
            login_calls: AtomicU32::new(0),
            register_calls: AtomicU32::new(0),
            renew_calls: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
        }
    }

    pub fn ttl(self, ttl: Duration) -> Self {
        *self.ttl.lock() = ttl;
        self
    }

    pub fn renew_delay(self, delay: Duration) -> Self {
        *self.renew_delay.lock() = delay;
        self
    }

    pub fn fail_renewals(&self, err: RenewError) {
        *self.renew_failure.lock() = Some(err);
    }

    pub fn fail_logins(&self, err: AuthError) {
        *self.login_failure.lock() = Some(err);
    }

    pub fn fail_logouts(&self, err: AuthError) {
        *self.logout_failure.lock() = Some(err);
    }

    pub fn token_on_register(self, on: bool) -> Self {
        self.token_on_register.store(on, Ordering::SeqCst);
        self
    }

    /// Include this user in renewal responses.
    pub fn renew_user(&self, principal: Principal) {
        *self.renew_user.lock() = Some(principal);
    }

    pub fn renewals(&self) -> u32 {
        self.renew_calls.load(Ordering::SeqCst)
    }

    /// Mint the next credential, valid for the configured ttl from now.
    pub fn issue(&self) -> Credential {
        let n = self.serial.fetch_add(1, Ordering::SeqCst);
        let exp = self.clock.now_secs() + self.ttl.lock().as_secs();
        mint_token_with(json!({ "exp": exp, "jti": n }))
    }
}

impl AuthApi for FakeAuthApi {
    fn login<'a>(&'a self, request: &'a LoginRequest) -> BoxFuture<'a, Result<AuthGrant, AuthError>> {
        async move {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.login_failure.lock().clone() {
                return Err(err);
            }
            let username = request.email.split('@').next().unwrap_or_default();
            Ok(AuthGrant { credential: self.issue(), principal: Some(principal(username)) })
        }
        .boxed()
    }

    fn register<'a>(&'a self, user: &'a NewUser) -> BoxFuture<'a, Result<Registration, AuthError>> {
        async move {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            let credential =
                self.token_on_register.load(Ordering::SeqCst).then(|| self.issue());
            Ok(Registration { principal: principal(&user.username), credential })
        }
        .boxed()
    }

    fn renew_credential(&self) -> BoxFuture<'_, Result<AuthGrant, RenewError>> {
        async move {
            self.renew_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.renew_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.renew_failure.lock().clone() {
                return Err(err);
            }
            Ok(AuthGrant { credential: self.issue(), principal: self.renew_user.lock().clone() })
        }
        .boxed()
    }

    fn logout_notify(&self) -> BoxFuture<'_, Result<(), AuthError>> {
        async move {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            match self.logout_failure.lock().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        .boxed()
    }
}

/// A fully in-memory [`AuthService`] with handles on its collaborators.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub storage: Arc<MemoryStore>,
    pub api: Arc<FakeAuthApi>,
    pub auth: Arc<AuthService>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(T0_MS));
        let api = FakeAuthApi::new(Arc::clone(&clock));
        Self::with_api(clock, api)
    }

    pub fn with_api(clock: Arc<ManualClock>, api: FakeAuthApi) -> Self {
        let storage = Arc::new(MemoryStore::new());
        let api = Arc::new(api);
        let auth = AuthService::new(
            Arc::clone(&api) as Arc<dyn AuthApi>,
            Arc::clone(&storage) as _,
            Arc::clone(&clock) as Arc<dyn Clock>,
            RenewalPolicy::default(),
        );
        Self { clock, storage, api, auth }
    }

    /// Adopt a credential expiring `secs` from now.
    pub fn sign_in_for(&self, secs: u64, username: &str) -> Credential {
        let credential = mint_token(self.clock.now_secs() + secs);
        self.auth.adopt(credential.clone(), Some(principal(username)));
        credential
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

type Handler = dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync;

/// A [`Transport`] answering from a closure, recording every request.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    latency: Duration,
    log: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self { handler: Box::new(handler), latency: Duration::ZERO, log: Mutex::new(Vec::new()) }
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().clone()
    }

    /// Requests sent to `path`, in order.
    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.log.lock().iter().filter(|r| r.path == path).cloned().collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>> {
        async move {
            self.log.lock().push(request.clone());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            (self.handler)(&request)
        }
        .boxed()
    }
}
