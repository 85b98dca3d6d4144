// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP Basic authentication.
//!
//! Each reporting cluster authenticates with its own username, which must also be
//! the `cluster_name` of every record it submits.

use std::collections::HashMap;
use std::fmt;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::PipelineError;

/// Read-only username to secret table.
#[derive(Clone, Default)]
pub struct IdentityStore {
    users: HashMap<String, String>,
}

impl IdentityStore {
    /// Build a store from `username -> secret` pairs.
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    /// Number of configured users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are configured (every request will be rejected).
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Check a username/secret pair. Unknown usernames never match, even with an
    /// empty secret.
    pub fn verify(&self, username: &str, secret: &str) -> bool {
        match self.users.get(username) {
            Some(expected) => constant_time_eq(expected.as_bytes(), secret.as_bytes()),
            None => false,
        }
    }
}

impl fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&str> = self.users.keys().map(String::as_str).collect();
        users.sort_unstable();
        f.debug_struct("IdentityStore").field("users", &users).finish()
    }
}

/// An authenticated username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(String);

impl Principal {
    /// Wrap an already verified username.
    pub fn new(username: impl Into<String>) -> Self {
        Self(username.into())
    }

    /// The username.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticate a request from its `Authorization` header.
pub fn authenticate(headers: &HeaderMap, store: &IdentityStore) -> Result<Principal, PipelineError> {
    let (username, secret) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic)
        .ok_or(PipelineError::Unauthenticated)?;

    tracing::debug!(username = %username, "Checking credentials");

    if !store.verify(&username, &secret) {
        return Err(PipelineError::InvalidCredentials);
    }
    Ok(Principal(username))
}

/// Parse `Basic <base64(user:secret)>`. The scheme is case-insensitive.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, secret) = decoded.split_once(':')?;
    Some((username.to_string(), secret.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
