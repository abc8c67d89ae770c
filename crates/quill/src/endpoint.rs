// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request classification by path.

/// How the gate treats a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    /// Sign-in surface: never carries the credential, never renews.
    Auth,
    /// Readable anonymously: carries the credential if held, never renews.
    Public,
    /// Everything else: carries the credential, a 401 triggers renewal.
    Protected,
}

/// Substring rules deciding the [`EndpointClass`] of a path.
///
/// Auth rules win over public ones; a path matching a public rule is still
/// protected if it also matches a public exclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRules {
    pub auth: Vec<String>,
    pub public: Vec<String>,
    pub public_exclusions: Vec<String>,
}

impl Default for EndpointRules {
    fn default() -> Self {
        Self {
            auth: vec!["/auth/login".into(), "/auth/register".into(), "/auth/refresh".into()],
            public: vec!["/blogs".into(), "/tags".into()],
            public_exclusions: vec!["/my-blogs".into()],
        }
    }
}

impl EndpointRules {
    pub fn classify(&self, path: &str) -> EndpointClass {
        if self.auth.iter().any(|p| path.contains(p.as_str())) {
            return EndpointClass::Auth;
        }
        let public = self.public.iter().any(|p| path.contains(p.as_str()))
            && !self.public_exclusions.iter().any(|p| path.contains(p.as_str()));
        if public {
            EndpointClass::Public
        } else {
            EndpointClass::Protected
        }
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
