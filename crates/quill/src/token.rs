// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer credential decoding and expiry arithmetic.
//!
//! Credentials are JWT-shaped (`header.payload.signature`). The payload is
//! decoded client-side without signature verification; only the `exp` claim
//! matters here. Validity is always re-derived from a caller-supplied "now",
//! never cached.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

/// An opaque bearer access credential.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn claims(&self) -> Result<Claims, DecodeError> {
        decode(&self.0)
    }

    pub fn is_valid(&self, now_ms: u64) -> bool {
        is_valid(&self.0, now_ms)
    }

    pub fn millis_until_expiry(&self, now_ms: u64) -> Option<i64> {
        millis_until_expiry(&self.0, now_ms)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print any part of the token itself.
        match self.claims() {
            Ok(claims) => write!(f, "Credential(exp={})", claims.exp),
            Err(_) => f.write_str("Credential(<undecodable>)"),
        }
    }
}

/// Claims carried in the credential payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Claims {
    /// Expiry, seconds since the Unix epoch.
    #[serde(deserialize_with = "epoch_seconds")]
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub sub: Option<String>,
}

impl Claims {
    pub fn expires_at_ms(&self) -> u64 {
        self.exp.saturating_mul(1000)
    }
}

/// Accept integral or fractional `exp` values; fractions are truncated.
fn epoch_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = serde_json::Number::deserialize(deserializer)?;
    if let Some(secs) = n.as_u64() {
        return Ok(secs);
    }
    match n.as_f64() {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs as u64),
        _ => Err(serde::de::Error::custom(format!("invalid exp claim: {n}"))),
    }
}

/// Why a credential could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not three `.`-separated segments.
    Structure,
    /// Payload segment is not base64.
    Encoding(String),
    /// Payload is not a JSON object with a numeric `exp`.
    Payload(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structure => f.write_str("credential is not a three-part token"),
            Self::Encoding(e) => write!(f, "credential payload is not base64: {e}"),
            Self::Payload(e) => write!(f, "credential payload is not valid claims: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode the claims of a bearer credential without verifying its signature.
pub fn decode(credential: &str) -> Result<Claims, DecodeError> {
    let mut parts = credential.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(DecodeError::Structure);
    };
    if payload.is_empty() {
        return Err(DecodeError::Structure);
    }

    let trimmed = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| DecodeError::Encoding(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(|e| DecodeError::Payload(e.to_string()))
}

/// True iff the credential decodes and its expiry lies strictly after `now_ms`.
pub fn is_valid(credential: &str, now_ms: u64) -> bool {
    match decode(credential) {
        Ok(claims) => claims.expires_at_ms() > now_ms,
        Err(_) => false,
    }
}

/// Milliseconds until expiry (negative once expired), `None` if undecodable.
pub fn millis_until_expiry(credential: &str, now_ms: u64) -> Option<i64> {
    let claims = decode(credential).ok()?;
    let expires = i64::try_from(claims.expires_at_ms()).unwrap_or(i64::MAX);
    let now = i64::try_from(now_ms).unwrap_or(i64::MAX);
    Some(expires.saturating_sub(now))
}

/// Human-oriented summary of a credential's expiry, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TokenInfo {
    Decoded {
        is_valid: bool,
        /// Expiry as milliseconds since the Unix epoch.
        expires_at_ms: u64,
        minutes_until_expiry: i64,
        seconds_until_expiry: i64,
    },
    Invalid {
        error: String,
    },
}

impl TokenInfo {
    pub fn inspect(credential: &Credential, now_ms: u64) -> Self {
        match credential.claims() {
            Ok(claims) => {
                let now_secs = i64::try_from(now_ms / 1000).unwrap_or(i64::MAX);
                let exp = i64::try_from(claims.exp).unwrap_or(i64::MAX);
                let remaining = exp.saturating_sub(now_secs);
                Self::Decoded {
                    is_valid: claims.expires_at_ms() > now_ms,
                    expires_at_ms: claims.expires_at_ms(),
                    minutes_until_expiry: remaining.div_euclid(60),
                    seconds_until_expiry: remaining.rem_euclid(60),
                }
            }
            Err(_) => Self::Invalid { error: "Invalid token format".to_owned() },
        }
    }
}

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self { now_ms: AtomicU64::new(now_ms) }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by_ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now_ms.fetch_add(by_ms, Ordering::SeqCst);
    }

    pub fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
