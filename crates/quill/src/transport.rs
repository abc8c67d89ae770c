// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response transport abstraction and its reqwest implementation.
//!
//! Requests address the API by path; the transport owns the base URL. The
//! `with_credentials` flag decides whether the cookie jar participates, which
//! is how the server-managed renewal cookie travels.

use std::fmt;
use std::sync::{Arc, Once};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{extract_detail, ApiError, ErrorCode};
use crate::token::Credential;

/// An outbound API request. Cheap to clone; the gate decorates copies.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/blogs/42`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Include the cookie jar (send cookies, accept `Set-Cookie`).
    pub with_credentials: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            with_credentials: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(body)?;
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    pub fn with_credentials(mut self, on: bool) -> Self {
        self.with_credentials = on;
        self
    }

    /// Copy of this request carrying `Authorization: Bearer <credential>`.
    ///
    /// A credential that is not a valid header value leaves the copy without
    /// an authorization header.
    pub fn with_bearer(&self, credential: &Credential) -> Self {
        let mut copy = self.clone();
        match HeaderValue::from_str(&format!("Bearer {}", credential.as_str())) {
            Ok(mut value) => {
                value.set_sensitive(true);
                copy.headers.insert(AUTHORIZATION, value);
            }
            Err(_) => {
                copy.headers.remove(AUTHORIZATION);
            }
        }
        copy
    }

    /// The bearer token carried by this request, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers.get(AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
    }
}

/// A received response, fully buffered.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }

    pub fn json_body<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Self {
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        let mut response = Self::new(status, bytes);
        response.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::new(ErrorCode::Decode).with_detail(e.to_string()))
    }

    /// Turn a non-2xx response into an [`ApiError`].
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ApiError::from_status(self.status.as_u16(), extract_detail(&self.body)))
    }
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    InvalidUrl(String),
    Timeout,
    Connect(String),
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(u) => write!(f, "invalid url: {u}"),
            Self::Timeout => f.write_str("request timed out"),
            Self::Connect(e) => write!(f, "connection failed: {e}"),
            Self::Other(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        ApiError::new(ErrorCode::Transport).with_detail(e.to_string())
    }
}

/// Sends requests. Implementations must be shareable across tasks.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>>;
}

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// HTTP transport over reqwest with an explicit cookie jar.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    jar: Arc<Jar>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        ensure_crypto();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { base_url, client, jar: Arc::new(Jar::default()) })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_owned()
        } else {
            format!("{}{}", self.base_url, path)
        };
        Url::parse(&raw).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))
    }

    /// The `Cookie` header the jar would send to `path`, for persisting
    /// the renewal cookie across process restarts.
    pub fn export_cookies(&self, path: &str) -> Option<String> {
        let url = self.url(path).ok()?;
        let header = self.jar.cookies(&url)?;
        header.to_str().ok().map(str::to_owned)
    }

    /// Re-seed the jar from a header produced by [`export_cookies`](Self::export_cookies).
    ///
    /// Cookies are scoped to the default path of `path`, which is where the
    /// server scopes its renewal cookie.
    pub fn import_cookies(&self, path: &str, header: &str) {
        let Ok(url) = self.url(path) else {
            return;
        };
        for pair in header.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            self.jar.add_cookie_str(pair, &url);
        }
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url(&request.path)?;
        let mut builder = self.client.request(request.method.clone(), url.clone()).headers(request.headers);
        if request.with_credentials {
            if let Some(cookies) = self.jar.cookies(&url) {
                builder = builder.header(COOKIE, cookies);
            }
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        if request.with_credentials {
            let mut set_cookies = headers.get_all(SET_COOKIE).iter().peekable();
            if set_cookies.peek().is_some() {
                self.jar.set_cookies(&mut set_cookies, &url);
            }
        }
        let body = resp.bytes().await?;
        debug!(method = %request.method, path = %request.path, status = status.as_u16(), "response");
        Ok(ApiResponse { status, headers, body })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>> {
        self.execute(request).boxed()
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
