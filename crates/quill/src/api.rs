// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth endpoint contracts: wire types and the network operations the
//! session layer depends on.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::coordinator::RenewError;
use crate::error::extract_detail;
use crate::token::Credential;
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

/// The authenticated user.
///
/// The API has shipped both `_id` and `id`, and both `profile_picture` and
/// `profile_image`; all four are kept as sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Authentication provider, e.g. `email`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_password: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Principal {
    pub fn user_id(&self) -> Option<&str> {
        self.object_id.as_deref().or(self.id.as_deref())
    }

    pub fn avatar(&self) -> Option<&str> {
        self.profile_picture.as_deref().or(self.profile_image.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_password: Option<String>,
}

/// Fields accepted by the profile update endpoint. Absent fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// A credential issued by login or renewal.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthGrant {
    pub credential: Credential,
    /// Renewal responses may omit the user.
    pub principal: Option<Principal>,
}

/// Login/refresh response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    user: Option<Principal>,
}

impl From<TokenResponse> for AuthGrant {
    fn from(r: TokenResponse) -> Self {
        Self { credential: Credential::new(r.access_token), principal: r.user }
    }
}

/// Outcome of registration: the created user and, if the server signed the
/// new user in directly, their credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub principal: Principal,
    pub credential: Option<Credential>,
}

/// Failures of login, registration and profile calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The server could not be reached.
    Network(String),
    /// The server answered with a non-2xx status.
    Rejected { status: u16, message: Option<String> },
    /// The server answered 2xx with a body we could not use.
    InvalidResponse(String),
    /// The operation needs a signed-in session.
    NotSignedIn,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "network error: {e}"),
            Self::Rejected { status, message: Some(m) } => write!(f, "rejected ({status}): {m}"),
            Self::Rejected { status, message: None } => write!(f, "rejected ({status})"),
            Self::InvalidResponse(e) => write!(f, "invalid response: {e}"),
            Self::NotSignedIn => f.write_str("not signed in"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<TransportError> for AuthError {
    fn from(e: TransportError) -> Self {
        Self::Network(e.to_string())
    }
}

impl AuthError {
    fn from_response(resp: &ApiResponse) -> Self {
        Self::Rejected { status: resp.status.as_u16(), message: extract_detail(&resp.body) }
    }
}

/// The auth network operations.
pub trait AuthApi: Send + Sync {
    fn login<'a>(&'a self, request: &'a LoginRequest) -> BoxFuture<'a, Result<AuthGrant, AuthError>>;

    fn register<'a>(&'a self, user: &'a NewUser) -> BoxFuture<'a, Result<Registration, AuthError>>;

    /// Exchange the server-held renewal cookie for a new credential.
    fn renew_credential(&self) -> BoxFuture<'_, Result<AuthGrant, RenewError>>;

    /// Tell the server to drop the renewal cookie. Best-effort.
    fn logout_notify(&self) -> BoxFuture<'_, Result<(), AuthError>>;
}

/// [`AuthApi`] over a [`Transport`], rooted at `/auth`.
pub struct HttpAuthApi {
    transport: Arc<dyn Transport>,
}

impl HttpAuthApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse, AuthError> {
        let request = ApiRequest::post(path)
            .json(body)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?
            .with_credentials(true);
        Ok(self.transport.send(request).await?)
    }

    async fn do_login(&self, request: &LoginRequest) -> Result<AuthGrant, AuthError> {
        let resp = self.post_json("/auth/login", request).await?;
        if !resp.is_success() {
            debug!(status = resp.status.as_u16(), "login rejected");
            return Err(AuthError::from_response(&resp));
        }
        let token: TokenResponse =
            resp.json().map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        info!("login response received");
        Ok(token.into())
    }

    async fn do_register(&self, user: &NewUser) -> Result<Registration, AuthError> {
        let resp = self.post_json("/auth/register", user).await?;
        if !resp.is_success() {
            return Err(AuthError::from_response(&resp));
        }
        let value: serde_json::Value =
            resp.json().map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        parse_registration(value)
    }

    async fn do_renew(&self) -> Result<AuthGrant, RenewError> {
        let request = ApiRequest::post("/auth/refresh").with_credentials(true);
        let resp = self
            .transport
            .send(request)
            .await
            .map_err(|e| RenewError::Network(e.to_string()))?;
        if !resp.is_success() {
            return Err(RenewError::Rejected { status: resp.status.as_u16() });
        }
        let token: TokenResponse =
            resp.json().map_err(|e| RenewError::InvalidResponse(e.to_string()))?;
        Ok(token.into())
    }

    async fn do_logout(&self) -> Result<(), AuthError> {
        let resp = self.post_json("/auth/logout", &serde_json::json!({})).await?;
        if !resp.is_success() {
            return Err(AuthError::from_response(&resp));
        }
        Ok(())
    }
}

/// Registration responses are either `{user, access_token?}` or the bare user.
fn parse_registration(value: serde_json::Value) -> Result<Registration, AuthError> {
    let credential = value
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(Credential::new);
    let user = value.get("user").cloned().unwrap_or(value);
    let principal: Principal =
        serde_json::from_value(user).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
    Ok(Registration { principal, credential })
}

impl AuthApi for HttpAuthApi {
    fn login<'a>(&'a self, request: &'a LoginRequest) -> BoxFuture<'a, Result<AuthGrant, AuthError>> {
        self.do_login(request).boxed()
    }

    fn register<'a>(&'a self, user: &'a NewUser) -> BoxFuture<'a, Result<Registration, AuthError>> {
        self.do_register(user).boxed()
    }

    fn renew_credential(&self) -> BoxFuture<'_, Result<AuthGrant, RenewError>> {
        self.do_renew().boxed()
    }

    fn logout_notify(&self) -> BoxFuture<'_, Result<(), AuthError>> {
        self.do_logout().boxed()
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
