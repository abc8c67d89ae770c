// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `quill request`: send an arbitrary API request through the auth gate.

use reqwest::Method;

use crate::transport::ApiRequest;

use super::Client;

#[derive(Debug, clap::Args)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, DELETE, ...).
    pub method: String,
    /// Path relative to the API URL, e.g. `/my-blogs`.
    pub path: String,
    /// JSON request body.
    #[arg(long)]
    pub data: Option<String>,
}

/// Build the request described by `args`.
pub fn build(args: &RequestArgs) -> anyhow::Result<ApiRequest> {
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid method: {}", args.method))?;
    let request = ApiRequest::new(method, &args.path);
    match args.data {
        Some(ref data) => {
            let body: serde_json::Value = serde_json::from_str(data)
                .map_err(|e| anyhow::anyhow!("--data is not valid JSON: {e}"))?;
            Ok(request.json(&body)?)
        }
        None => Ok(request),
    }
}

pub async fn run(client: &Client, args: &RequestArgs) -> i32 {
    let request = match build(args) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };

    let response = match client.gate.send(request).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let status = response.status;
    let text = response.text();
    if status.is_success() {
        // Pretty-print JSON bodies, raw text otherwise.
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or(text)),
            Err(_) => println!("{text}"),
        }
        0
    } else {
        eprintln!("error ({status}): {text}");
        1
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
