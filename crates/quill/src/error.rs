// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-facing error categories for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    BadRequest,
    Conflict,
    Server,
    Transport,
    Decode,
    Unexpected,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            400 | 422 => Self::BadRequest,
            409 => Self::Conflict,
            500..=599 => Self::Server,
            _ => Self::Unexpected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::BadRequest => "BAD_REQUEST",
            Self::Conflict => "CONFLICT",
            Self::Server => "SERVER_ERROR",
            Self::Transport => "TRANSPORT",
            Self::Decode => "DECODE",
            Self::Unexpected => "UNEXPECTED",
        }
    }

    /// Short message suitable for showing to the person at the keyboard.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized => "please sign in again",
            Self::Forbidden => "you do not have access to this resource",
            Self::NotFound => "not found",
            Self::BadRequest => "the request was rejected",
            Self::Conflict => "the resource was changed by someone else",
            Self::Server => "the server failed to handle the request",
            Self::Transport => "could not reach the server",
            Self::Decode => "the server sent an unexpected response",
            Self::Unexpected => "unexpected response",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed API call as seen by application code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub status: Option<u16>,
    /// Server-supplied detail, if any.
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode) -> Self {
        Self { code, status: None, detail: None }
    }

    pub fn from_status(status: u16, detail: Option<String>) -> Self {
        Self { code: ErrorCode::from_status(status), status: Some(status), detail }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_sign_in_required(&self) -> bool {
        self.code == ErrorCode::Unauthorized
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code.user_message())?;
        if let Some(status) = self.status {
            write!(f, " ({status})")?;
        }
        if let Some(ref detail) = self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Pull a human-readable message out of a JSON error body.
///
/// Understands `{"detail": "..."}`, `{"message": "..."}` and `{"error": "..."}`.
pub fn extract_detail(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    ["detail", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_owned))
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
