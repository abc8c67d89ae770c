// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::command::Command;
use crate::scheduler::RenewalPolicy;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api/v1";

/// File holding the persisted session, inside the state directory.
pub const SESSION_FILE: &str = "session.json";

/// Command-line client for the blog API with automatic session renewal.
#[derive(Debug, Parser)]
#[command(name = "quill", version, about)]
pub struct Config {
    /// Base URL of the API, including the version prefix.
    #[arg(long, env = "QUILL_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Directory for the persisted session (defaults to the XDG state dir).
    #[arg(long, env = "QUILL_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Per-request timeout in ms.
    #[arg(long, env = "QUILL_TIMEOUT_MS", default_value = "30000")]
    pub timeout_ms: u64,

    /// Renew this many seconds before the credential expires.
    #[arg(long, env = "QUILL_RENEWAL_LEAD_SECS", default_value = "300")]
    pub renewal_lead_secs: u64,

    /// Do not arm a renewal timer shorter than this many seconds.
    #[arg(long, env = "QUILL_RENEWAL_MIN_SECS", default_value = "60")]
    pub renewal_min_secs: u64,

    /// Log format (json or text).
    #[arg(long, env = "QUILL_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "QUILL_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| anyhow::anyhow!("invalid --api-url {:?}: {e}", self.api_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("--api-url must be http or https, got {}", url.scheme());
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("--timeout-ms must be greater than zero");
        }
        if self.renewal_lead_secs == 0 {
            anyhow::bail!("--renewal-lead-secs must be greater than zero");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn renewal_policy(&self) -> RenewalPolicy {
        RenewalPolicy {
            lead: Duration::from_secs(self.renewal_lead_secs),
            min_delay: Duration::from_secs(self.renewal_min_secs),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(crate::storage::state_dir)
    }

    pub fn session_path(&self) -> PathBuf {
        self.state_dir().join(SESSION_FILE)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
