//! Caller Identity
//!
//! The authenticated user id is supplied by whatever sits in front of this
//! service (an auth proxy or session middleware). We only read it.

use axum::http::HeaderMap;
use serde::Serialize;
use std::fmt;

use super::error::CreditError;

/// Opaque, non-empty identifier of the authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identity(String);

impl Identity {
    /// Build an identity, rejecting empty or whitespace-only ids
    pub fn new(id: impl Into<String>) -> Result<Self, CreditError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CreditError::Unauthorized);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves the caller's identity from request headers
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Result<Identity, CreditError>;
}

/// Reads the identity from a single trusted header
#[derive(Debug, Clone)]
pub struct HeaderIdentityResolver {
    header: String,
}

impl HeaderIdentityResolver {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }
}

impl Default for HeaderIdentityResolver {
    fn default() -> Self {
        Self::new("x-user-id")
    }
}

impl IdentityResolver for HeaderIdentityResolver {
    fn resolve(&self, headers: &HeaderMap) -> Result<Identity, CreditError> {
        let value = headers
            .get(self.header.as_str())
            .ok_or(CreditError::Unauthorized)?
            .to_str()
            .map_err(|_| CreditError::Unauthorized)?;
        Identity::new(value.trim())
    }
}
