// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::*;
use crate::transport::HttpTransport;

struct Server {
    addr: SocketAddr,
    refreshes: Arc<AtomicU32>,
}

async fn spawn_auth_server() -> anyhow::Result<Server> {
    let refreshes = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&refreshes);

    let app = Router::new()
        .route(
            "/api/v1/auth/login",
            post(|Json(body): Json<Value>| async move {
                if body["password"] == "hunter2" {
                    (
                        StatusCode::OK,
                        [(axum::http::header::SET_COOKIE, "refresh_token=r1; HttpOnly; Path=/")],
                        Json(json!({
                            "access_token": "h.p.s",
                            "refresh_token": "ignored",
                            "token_type": "bearer",
                            "user": { "_id": "u1", "username": "ada", "email": "ada@example.com",
                                      "created_at": "2025-01-01T00:00:00Z", "extra": 1 }
                        })),
                    )
                } else {
                    (
                        StatusCode::UNAUTHORIZED,
                        [(axum::http::header::SET_COOKIE, "x=y")],
                        Json(json!({ "detail": "Incorrect email or password" })),
                    )
                }
            }),
        )
        .route(
            "/api/v1/auth/register",
            post(|Json(body): Json<Value>| async move {
                if body["username"] == "taken" {
                    return (StatusCode::CONFLICT, Json(json!({ "detail": "Username taken" })));
                }
                (
                    StatusCode::CREATED,
                    Json(json!({
                        "_id": "u2",
                        "username": body["username"],
                        "email": body["email"],
                        "created_at": "2025-01-02T00:00:00Z"
                    })),
                )
            }),
        )
        .route(
            "/api/v1/auth/refresh",
            post(move |headers: HeaderMap| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let cookie = headers.get("cookie").and_then(|v| v.to_str().ok()).unwrap_or("");
                    if cookie.contains("refresh_token=r1") {
                        (StatusCode::OK, Json(json!({ "access_token": "h.p2.s" })))
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "no refresh cookie" })))
                    }
                }
            }),
        )
        .route(
            "/api/v1/auth/logout",
            post(|| async { Json(json!({ "message": "logged out" })) }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(Server { addr, refreshes })
}

fn api_for(addr: SocketAddr) -> anyhow::Result<HttpAuthApi> {
    let transport = HttpTransport::new(format!("http://{addr}/api/v1"), Duration::from_secs(5))?;
    Ok(HttpAuthApi::new(Arc::new(transport)))
}

fn login(password: &str) -> LoginRequest {
    LoginRequest { email: "ada@example.com".into(), password: password.into() }
}

#[tokio::test]
async fn login_returns_grant_with_principal() -> anyhow::Result<()> {
    let server = spawn_auth_server().await?;
    let api = api_for(server.addr)?;

    let grant = api.login(&login("hunter2")).await?;
    assert_eq!(grant.credential.as_str(), "h.p.s");
    let principal = grant.principal.as_ref();
    assert_eq!(principal.map(|p| p.username.as_str()), Some("ada"));
    assert_eq!(principal.and_then(|p| p.user_id()), Some("u1"));
    Ok(())
}

#[tokio::test]
async fn login_rejection_carries_detail() -> anyhow::Result<()> {
    let server = spawn_auth_server().await?;
    let api = api_for(server.addr)?;

    let err = api.login(&login("wrong")).await.err();
    assert_eq!(
        err,
        Some(AuthError::Rejected {
            status: 401,
            message: Some("Incorrect email or password".into())
        })
    );
    Ok(())
}

#[tokio::test]
async fn renewal_uses_cookie_from_login() -> anyhow::Result<()> {
    let server = spawn_auth_server().await?;
    let api = api_for(server.addr)?;

    let before = api.renew_credential().await.err();
    assert_eq!(before, Some(RenewError::Rejected { status: 401 }));

    api.login(&login("hunter2")).await?;
    let grant = api.renew_credential().await?;
    assert_eq!(grant.credential.as_str(), "h.p2.s");
    assert_eq!(grant.principal, None);
    assert_eq!(server.refreshes.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn register_accepts_bare_user_body() -> anyhow::Result<()> {
    let server = spawn_auth_server().await?;
    let api = api_for(server.addr)?;

    let user = NewUser {
        username: "grace".into(),
        email: "grace@example.com".into(),
        password: "pw".into(),
        confirm_password: Some("pw".into()),
    };
    let registration = api.register(&user).await?;
    assert_eq!(registration.principal.username, "grace");
    assert_eq!(registration.principal.user_id(), Some("u2"));
    assert_eq!(registration.credential, None);
    Ok(())
}

#[tokio::test]
async fn register_conflict_is_rejected() -> anyhow::Result<()> {
    let server = spawn_auth_server().await?;
    let api = api_for(server.addr)?;

    let user = NewUser {
        username: "taken".into(),
        email: "t@example.com".into(),
        password: "pw".into(),
        confirm_password: None,
    };
    let err = api.register(&user).await.err();
    assert_eq!(err, Some(AuthError::Rejected { status: 409, message: Some("Username taken".into()) }));
    Ok(())
}

#[tokio::test]
async fn logout_notify_succeeds() -> anyhow::Result<()> {
    let server = spawn_auth_server().await?;
    let api = api_for(server.addr)?;
    api.logout_notify().await?;
    Ok(())
}

#[tokio::test]
async fn unreachable_server_is_network_error() -> anyhow::Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    let api = api_for(addr)?;

    assert!(matches!(api.login(&login("x")).await, Err(AuthError::Network(_))));
    assert!(matches!(api.renew_credential().await, Err(RenewError::Network(_))));
    Ok(())
}

#[test]
fn registration_with_nested_user_and_token() -> anyhow::Result<()> {
    let value = json!({
        "access_token": "h.p.s",
        "user": { "id": "legacy", "username": "lin", "email": "lin@example.com" }
    });
    let registration = parse_registration(value)?;
    assert_eq!(registration.credential, Some(Credential::new("h.p.s")));
    assert_eq!(registration.principal.user_id(), Some("legacy"));
    Ok(())
}

#[test]
fn principal_keeps_both_picture_fields() -> anyhow::Result<()> {
    let principal: Principal = serde_json::from_value(json!({
        "username": "u", "email": "e", "profile_image": "img.png", "id": "1", "_id": "2"
    }))?;
    assert_eq!(principal.avatar(), Some("img.png"));
    assert_eq!(principal.user_id(), Some("2"));
    Ok(())
}
