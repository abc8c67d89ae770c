// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that run the real `quill` binary against the mock
//! blog API: sign-in, persisted sessions, renewal on 401, and sign-out.

use quill::session::{ACCESS_TOKEN_KEY, CURRENT_USER_KEY};
use quill_specs::{MockApi, Quill};

fn stored_token(quill: &Quill) -> anyhow::Result<Option<String>> {
    Ok(quill.session()?[ACCESS_TOKEN_KEY].as_str().map(str::to_owned))
}

#[tokio::test]
async fn login_then_whoami() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let quill = Quill::new(&api)?;

    let login = quill.login("ada@example.com").await?;
    assert!(login.success(), "login failed: {login:?}");
    assert!(login.stdout.contains("Logged in as ada."));

    let whoami = quill.run(&["whoami"]).await?;
    assert!(whoami.success(), "whoami failed: {whoami:?}");
    let user: serde_json::Value = serde_json::from_str(&whoami.stdout)?;
    assert_eq!(user["username"], "ada");

    let session = quill.session()?;
    assert!(session[ACCESS_TOKEN_KEY].is_string());
    assert!(session[CURRENT_USER_KEY].is_string());
    assert!(session["cookies"].as_str().is_some_and(|c| c.contains("refresh_token=")));
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let quill = Quill::new(&api)?;

    let run = quill.run(&["login", "--email", "ada@example.com", "--password", "nope"]).await?;
    assert_eq!(run.code, Some(1));
    assert!(run.stderr.contains("Incorrect email or password"), "stderr: {}", run.stderr);

    let whoami = quill.run(&["whoami"]).await?;
    assert_eq!(whoami.code, Some(1));
    Ok(())
}

#[tokio::test]
async fn expired_access_token_is_renewed_once() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let quill = Quill::new(&api)?;
    quill.login("ada@example.com").await?;
    let before = stored_token(&quill)?;

    api.state().expire_access_tokens();
    let run = quill.run(&["request", "GET", "/my-blogs"]).await?;
    assert!(run.success(), "request failed: {run:?}");
    assert!(run.stdout.contains("\"author\": \"ada\""));
    assert_eq!(api.state().refreshes(), 1);

    let after = stored_token(&quill)?;
    assert!(after.is_some());
    assert_ne!(after, before);

    // The renewed credential is persisted and accepted without renewing again.
    let again = quill.run(&["request", "GET", "/my-blogs"]).await?;
    assert!(again.success());
    assert_eq!(api.state().refreshes(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_renewal_signs_out() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let quill = Quill::new(&api)?;
    quill.login("ada@example.com").await?;

    api.state().expire_access_tokens();
    api.state().revoke_renewals();
    let run = quill.run(&["request", "GET", "/my-blogs"]).await?;
    assert_eq!(run.code, Some(1));
    assert!(run.stderr.contains("401"), "stderr: {}", run.stderr);
    assert_eq!(api.state().refreshes(), 1);

    assert_eq!(stored_token(&quill)?, None);
    assert_eq!(quill.run(&["whoami"]).await?.code, Some(1));
    Ok(())
}

#[tokio::test]
async fn public_endpoint_never_renews() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let quill = Quill::new(&api)?;

    let anonymous = quill.run(&["request", "GET", "/blogs"]).await?;
    assert!(anonymous.success(), "request failed: {anonymous:?}");
    assert!(anonymous.stdout.contains("Hello"));

    quill.login("ada@example.com").await?;
    api.state().expire_access_tokens();
    let signed_in = quill.run(&["request", "GET", "/blogs"]).await?;
    assert!(signed_in.success());
    assert_eq!(api.state().refreshes(), 0);
    Ok(())
}

#[tokio::test]
async fn logout_revokes_renewal_cookie() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let quill = Quill::new(&api)?;
    quill.login("ada@example.com").await?;

    let logout = quill.run(&["logout"]).await?;
    assert!(logout.success());
    assert_eq!(api.state().logouts(), 1);
    let session = quill.session()?;
    assert!(session[ACCESS_TOKEN_KEY].is_null());
    assert!(session["cookies"].is_null());

    // Signed out: the protected request carries no credential and is not renewed.
    let run = quill.run(&["request", "GET", "/my-blogs"]).await?;
    assert_eq!(run.code, Some(1));
    assert_eq!(api.state().refreshes(), 0);
    Ok(())
}

#[tokio::test]
async fn profile_update_changes_principal() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let quill = Quill::new(&api)?;
    quill.login("ada@example.com").await?;

    let run = quill.run(&["profile", "--full-name", "Ada Lovelace"]).await?;
    assert!(run.success(), "profile failed: {run:?}");

    let whoami = quill.run(&["whoami"]).await?;
    let user: serde_json::Value = serde_json::from_str(&whoami.stdout)?;
    assert_eq!(user["full_name"], "Ada Lovelace");
    Ok(())
}

#[tokio::test]
async fn register_does_not_sign_in() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let quill = Quill::new(&api)?;

    let args = ["register", "--username", "grace", "--email", "grace@example.com", "--password", "pw"];
    let run = quill.run(&args).await?;
    assert!(run.success(), "register failed: {run:?}");
    assert!(run.stdout.contains("Registered grace."));
    assert_eq!(quill.run(&["whoami"]).await?.code, Some(1));

    let again = quill.run(&args).await?;
    assert_eq!(again.code, Some(1));
    assert!(again.stderr.contains("already registered"));
    Ok(())
}

#[tokio::test]
async fn invalid_config_exits_2() -> anyhow::Result<()> {
    let api = MockApi::start().await?;
    let quill = Quill::new(&api)?;
    let run = quill.run(&["--log-format", "xml", "whoami"]).await?;
    assert_eq!(run.code, Some(2));
    Ok(())
}
