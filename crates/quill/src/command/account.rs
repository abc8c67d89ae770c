// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session and account subcommands.

use crate::api::{NewUser, PasswordChange, ProfileChanges};
use crate::scheduler::ArmPlan;
use crate::token::{Clock, SystemClock};

use super::Client;

#[derive(Debug, clap::Args)]
pub struct LoginArgs {
    #[arg(long)]
    pub email: String,
    #[arg(long, env = "QUILL_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Debug, clap::Args)]
pub struct RegisterArgs {
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub email: String,
    #[arg(long, env = "QUILL_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Debug, clap::Args)]
pub struct ProfileArgs {
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub full_name: Option<String>,
    #[arg(long)]
    pub bio: Option<String>,
    /// URL of the new profile picture.
    #[arg(long)]
    pub profile_picture: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct PasswordArgs {
    #[arg(long)]
    pub current: String,
    #[arg(long)]
    pub new: String,
}

pub async fn login(client: &Client, args: &LoginArgs) -> i32 {
    match client.auth.login(&args.email, &args.password).await {
        Ok(grant) => {
            match grant.principal {
                Some(p) => println!("Logged in as {}.", p.username),
                None => println!("Logged in."),
            }
            0
        }
        Err(e) => {
            eprintln!("error: login failed: {e}");
            1
        }
    }
}

pub async fn register(client: &Client, args: &RegisterArgs) -> i32 {
    let user = NewUser {
        username: args.username.clone(),
        email: args.email.clone(),
        password: args.password.clone(),
        confirm_password: Some(args.password.clone()),
    };
    match client.auth.register(&user).await {
        Ok(registration) => {
            println!("Registered {}.", registration.principal.username);
            if registration.credential.is_some() {
                println!("Logged in as {}.", registration.principal.username);
            }
            0
        }
        Err(e) => {
            eprintln!("error: registration failed: {e}");
            1
        }
    }
}

pub async fn logout(client: &Client) -> i32 {
    client.auth.logout().await;
    println!("Logged out.");
    0
}

pub fn whoami(client: &Client) -> i32 {
    let Some(principal) = client.auth.current_principal() else {
        eprintln!("error: not signed in");
        return 1;
    };
    match serde_json::to_string_pretty(&principal) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

pub fn token(client: &Client) -> i32 {
    let Some(credential) = client.auth.current_credential() else {
        eprintln!("error: not signed in");
        return 1;
    };
    let now = SystemClock.now_ms();
    let plan = match client.auth.renewal_policy().plan(&credential, now) {
        ArmPlan::Arm(delay) => format!("renew in {}s", delay.as_secs()),
        ArmPlan::TooClose(delay) => format!("renewal point in {}s, too close to arm", delay.as_secs()),
        ArmPlan::Expired => "expired".to_owned(),
    };
    let info = client.auth.token_info();
    let body = serde_json::json!({ "token": info, "renewal": plan });
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    0
}

pub async fn profile(client: &Client, args: &ProfileArgs) -> i32 {
    let changes = ProfileChanges {
        username: args.username.clone(),
        full_name: args.full_name.clone(),
        bio: args.bio.clone(),
        profile_picture: args.profile_picture.clone(),
    };
    match client.auth.update_profile(&client.gate, &changes).await {
        Ok(principal) => {
            println!("Updated profile for {}.", principal.username);
            0
        }
        Err(e) => {
            eprintln!("error: profile update failed: {e}");
            1
        }
    }
}

pub async fn password(client: &Client, args: &PasswordArgs) -> i32 {
    let change = PasswordChange {
        current_password: args.current.clone(),
        new_password: args.new.clone(),
        confirm_password: args.new.clone(),
    };
    match client.auth.change_password(&client.gate, &change).await {
        Ok(()) => {
            println!("Password changed.");
            0
        }
        Err(e) => {
            eprintln!("error: password change failed: {e}");
            1
        }
    }
}
