// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands: `login`, `register`, `logout`, `whoami`, `token`,
//! `profile`, `password`, `request`.
//!
//! Each invocation restores the persisted session, runs one command through
//! the auth service and gate, then persists the renewal cookie again.

pub mod account;
pub mod request;

use std::sync::Arc;

use tracing::debug;

use crate::api::HttpAuthApi;
use crate::auth::AuthService;
use crate::config::Config;
use crate::gate::AuthGate;
use crate::storage::{FileStore, KeyValueStore};
use crate::token::SystemClock;
use crate::transport::HttpTransport;

/// Storage key for the exported renewal cookie.
pub const COOKIES_KEY: &str = "cookies";

/// Path the renewal cookie is scoped to.
const RENEWAL_PATH: &str = "/auth/refresh";

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Sign in with email and password.
    Login(account::LoginArgs),
    /// Create an account (signs in if the server issues a token).
    Register(account::RegisterArgs),
    /// Sign out locally and on the server.
    Logout,
    /// Print the signed-in user.
    Whoami,
    /// Print credential expiry details and the renewal plan.
    Token,
    /// Update profile fields of the signed-in user.
    Profile(account::ProfileArgs),
    /// Change the password of the signed-in user.
    Password(account::PasswordArgs),
    /// Send an API request through the auth gate.
    Request(request::RequestArgs),
}

/// Everything a command needs: transport, session and gate.
pub struct Client {
    pub transport: Arc<HttpTransport>,
    pub storage: Arc<FileStore>,
    pub auth: Arc<AuthService>,
    pub gate: AuthGate,
}

impl Client {
    /// Build the client stack and restore any persisted session.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config.api_url, config.timeout())?);
        let storage = Arc::new(FileStore::open(config.session_path()));
        if let Some(cookies) = storage.get(COOKIES_KEY) {
            transport.import_cookies(RENEWAL_PATH, &cookies);
        }

        let api = Arc::new(HttpAuthApi::new(Arc::clone(&transport) as _));
        let auth = AuthService::new(
            api,
            Arc::clone(&storage) as _,
            Arc::new(SystemClock),
            config.renewal_policy(),
        );
        let restored = auth.restore();
        debug!(restored, path = %storage.path().display(), "session loaded");

        let gate = AuthGate::new(Arc::clone(&transport) as _, Arc::clone(&auth));
        Ok(Self { transport, storage, auth, gate })
    }

    /// Persist the renewal cookie and stop the renewal timer.
    pub fn close(&self) {
        match self.transport.export_cookies(RENEWAL_PATH) {
            Some(cookies) => self.storage.set(COOKIES_KEY, &cookies),
            None => self.storage.remove(COOKIES_KEY),
        }
        self.auth.dispose();
    }
}

/// Run the selected subcommand. Returns a process exit code.
pub async fn run(config: &Config) -> i32 {
    let client = match Client::open(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };

    let code = match &config.command {
        Command::Login(args) => account::login(&client, args).await,
        Command::Register(args) => account::register(&client, args).await,
        Command::Logout => account::logout(&client).await,
        Command::Whoami => account::whoami(&client),
        Command::Token => account::token(&client),
        Command::Profile(args) => account::profile(&client, args).await,
        Command::Password(args) => account::password(&client, args).await,
        Command::Request(args) => request::run(&client, args).await,
    };
    client.close();
    code
}
