// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Runs the real `quill` binary as a subprocess against an in-process mock
//! of the blog API, which issues short JWT-shaped access tokens and keeps
//! the renewal token in an HTTP-only cookie.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const PASSWORD: &str = "hunter2";

/// Resolve the path to the compiled `quill` binary.
pub fn quill_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("quill")
}

#[derive(Default)]
struct Inner {
    /// Access tokens the API currently accepts, mapped to usernames.
    access: HashMap<String, String>,
    /// Renewal tokens (cookie values) mapped to usernames.
    renewal: HashMap<String, String>,
    users: HashMap<String, Value>,
    registered: HashSet<String>,
}

/// Shared state of the mock API.
#[derive(Default)]
pub struct ApiState {
    inner: Mutex<Inner>,
    serial: AtomicU64,
    refreshes: AtomicU32,
    logouts: AtomicU32,
}

impl ApiState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mint(&self, ttl_secs: u64) -> String {
        let n = self.serial.fetch_add(1, Ordering::SeqCst);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": now + ttl_secs, "jti": n }).to_string());
        format!("{header}.{payload}.mock{n}")
    }

    fn user(&self, username: &str) -> Value {
        self.lock().users.get(username).cloned().unwrap_or_else(|| {
            json!({
                "_id": format!("id-{username}"),
                "username": username,
                "email": format!("{username}@example.com"),
                "provider": "email",
            })
        })
    }

    fn bearer_user(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?;
        self.lock().access.get(token).cloned()
    }

    /// Forget every access token, as if they had all expired server-side.
    pub fn expire_access_tokens(&self) {
        self.lock().access.clear();
    }

    /// Forget every renewal cookie.
    pub fn revoke_renewals(&self) {
        self.lock().renewal.clear();
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> u32 {
        self.logouts.load(Ordering::SeqCst)
    }
}

fn unauthorized(detail: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "detail": detail }))).into_response()
}

fn renewal_cookie(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?.to_str().ok()?;
    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("refresh_token="))
        .map(str::to_owned)
}

async fn login(State(state): State<Arc<ApiState>>, Json(body): Json<Value>) -> Response {
    if body["password"] != PASSWORD {
        return unauthorized("Incorrect email or password");
    }
    let email = body["email"].as_str().unwrap_or_default();
    let username = email.split('@').next().unwrap_or_default().to_owned();
    let access = state.mint(3600);
    let renewal = state.mint(86_400);
    {
        let mut inner = state.lock();
        inner.access.insert(access.clone(), username.clone());
        inner.renewal.insert(renewal.clone(), username.clone());
    }
    let cookie = format!("refresh_token={renewal}; HttpOnly; Path=/api/v1/auth");
    (
        [(SET_COOKIE, cookie)],
        Json(json!({
            "access_token": access,
            "refresh_token": renewal,
            "token_type": "bearer",
            "user": state.user(&username),
        })),
    )
        .into_response()
}

async fn register(State(state): State<Arc<ApiState>>, Json(body): Json<Value>) -> Response {
    let username = body["username"].as_str().unwrap_or_default().to_owned();
    if !state.lock().registered.insert(username.clone()) {
        return (StatusCode::CONFLICT, Json(json!({ "detail": "Username already registered" })))
            .into_response();
    }
    (StatusCode::CREATED, Json(state.user(&username))).into_response()
}

async fn refresh(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    state.refreshes.fetch_add(1, Ordering::SeqCst);
    let Some(cookie) = renewal_cookie(&headers) else {
        return unauthorized("Refresh token missing");
    };
    let Some(username) = state.lock().renewal.get(&cookie).cloned() else {
        return unauthorized("Invalid refresh token");
    };
    let access = state.mint(3600);
    state.lock().access.insert(access.clone(), username);
    Json(json!({ "access_token": access, "token_type": "bearer" })).into_response()
}

async fn logout(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    state.logouts.fetch_add(1, Ordering::SeqCst);
    if let Some(cookie) = renewal_cookie(&headers) {
        state.lock().renewal.remove(&cookie);
    }
    (
        [(SET_COOKIE, "refresh_token=; Max-Age=0; Path=/api/v1/auth".to_owned())],
        Json(json!({ "message": "Successfully logged out" })),
    )
        .into_response()
}

async fn update_username(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(username) = state.bearer_user(&headers) else {
        return unauthorized("Not authenticated");
    };
    let mut user = state.user(&username);
    if let (Some(fields), Some(target)) = (body.as_object(), user.as_object_mut()) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
    state.lock().users.insert(username, user.clone());
    Json(user).into_response()
}

async fn blogs() -> Response {
    Json(json!([{ "id": 1, "title": "Hello" }])).into_response()
}

async fn my_blogs(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    match state.bearer_user(&headers) {
        Some(username) => Json(json!([{ "id": 2, "author": username }])).into_response(),
        None => unauthorized("Not authenticated"),
    }
}

/// A running mock API, aborted on drop.
pub struct MockApi {
    addr: SocketAddr,
    state: Arc<ApiState>,
    task: tokio::task::JoinHandle<()>,
}

impl MockApi {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(ApiState::default());
        let app = Router::new()
            .route("/api/v1/auth/login", post(login))
            .route("/api/v1/auth/register", post(register))
            .route("/api/v1/auth/refresh", post(refresh))
            .route("/api/v1/auth/logout", post(logout))
            .route("/api/v1/auth/update-username", put(update_username))
            .route("/api/v1/blogs", get(blogs))
            .route("/api/v1/my-blogs", get(my_blogs))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, state, task })
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    pub fn state(&self) -> &ApiState {
        &self.state
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Output of one `quill` invocation.
#[derive(Debug)]
pub struct Run {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Run {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs `quill` against one API with its own state directory.
pub struct Quill {
    api_url: String,
    state_dir: tempfile::TempDir,
}

impl Quill {
    pub fn new(api: &MockApi) -> anyhow::Result<Self> {
        Ok(Self { api_url: api.api_url(), state_dir: tempfile::tempdir()? })
    }

    pub fn state_dir(&self) -> &Path {
        self.state_dir.path()
    }

    /// The persisted session file, parsed.
    pub fn session(&self) -> anyhow::Result<Value> {
        let path = self.state_dir().join("session.json");
        if !path.exists() {
            return Ok(json!({}));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub async fn run(&self, args: &[&str]) -> anyhow::Result<Run> {
        let binary = quill_binary();
        anyhow::ensure!(binary.exists(), "quill binary not found at {}", binary.display());

        let output = tokio::process::Command::new(&binary)
            .args(args)
            .env("QUILL_API_URL", &self.api_url)
            .env("QUILL_STATE_DIR", self.state_dir())
            .env("QUILL_LOG_LEVEL", "warn")
            .env("QUILL_TIMEOUT_MS", "5000")
            .stdin(Stdio::null())
            .output();
        let output = tokio::time::timeout(Duration::from_secs(20), output).await??;
        Ok(Run {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    pub async fn login(&self, email: &str) -> anyhow::Result<Run> {
        self.run(&["login", "--email", email, "--password", PASSWORD]).await
    }
}
