// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The request authorization gate.
//!
//! Every API request goes out through [`AuthGate::send`]: it joins the cookie
//! jar, carries the bearer credential where the endpoint class allows it, and
//! on a 401 from a protected endpoint joins the single renewal and resends
//! the request once with the renewed credential.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::auth::AuthService;
use crate::endpoint::{EndpointClass, EndpointRules};
use crate::error::ApiError;
use crate::token::Credential;
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    Transport(TransportError),
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GateError {}

impl From<TransportError> for GateError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Transport(t) => t.into(),
        }
    }
}

/// Decorates and sends requests on behalf of an [`AuthService`].
#[derive(Clone)]
pub struct AuthGate {
    transport: Arc<dyn Transport>,
    auth: Arc<AuthService>,
    rules: EndpointRules,
}

impl AuthGate {
    pub fn new(transport: Arc<dyn Transport>, auth: Arc<AuthService>) -> Self {
        Self { transport, auth, rules: EndpointRules::default() }
    }

    pub fn with_rules(mut self, rules: EndpointRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &EndpointRules {
        &self.rules
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    /// Send `request`, renewing the credential and retrying once on a 401
    /// from a protected endpoint.
    ///
    /// HTTP error statuses are returned as responses; only transport
    /// failures are errors.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, GateError> {
        let class = self.rules.classify(&request.path);
        let request = request.with_credentials(true);
        let sent = match class {
            EndpointClass::Auth => None,
            EndpointClass::Public | EndpointClass::Protected => self.auth.current_credential(),
        };
        let outbound = match sent {
            Some(ref credential) => request.with_bearer(credential),
            None => request.clone(),
        };

        let response = self.transport.send(outbound).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }
        if class != EndpointClass::Protected {
            debug!(path = %request.path, ?class, "401 on non-protected endpoint, not refreshing");
            return Ok(response);
        }
        let Some(sent) = sent else {
            return Ok(response);
        };

        match self.auth.current_credential() {
            None => {
                debug!(path = %request.path, "session ended since dispatch, not refreshing");
                return Ok(response);
            }
            Some(current) if current != sent => {
                if self.auth.is_unexpired(&current) {
                    debug!(path = %request.path, "credential renewed since dispatch, retrying");
                    return self.resend(&request, &current).await;
                }
                debug!(path = %request.path, "credential replaced since dispatch but expired");
            }
            Some(_) => {}
        }

        info!(path = %request.path, "401 on protected endpoint, attempting token refresh");
        match self.auth.renew().await {
            Ok(fresh) => self.resend(&request, &fresh).await,
            Err(e) => {
                warn!(path = %request.path, err = %e, "token refresh failed");
                Ok(response)
            }
        }
    }

    async fn resend(
        &self,
        request: &ApiRequest,
        credential: &Credential,
    ) -> Result<ApiResponse, GateError> {
        Ok(self.transport.send(request.with_bearer(credential)).await?)
    }

    /// [`send`](Self::send), then decode a 2xx JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.send(request).await?.error_for_status()?.json()
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
