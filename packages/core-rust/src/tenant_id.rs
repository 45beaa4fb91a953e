//! Validated tenant identifiers.
//!
//! A [`TenantId`] is both the registry cache key and the literal name of the
//! tenant's storage namespace, so the charset check in [`validate`] is the
//! only thing standing between request input and a schema name in SQL.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TenantError;

/// Name of the default, non-tenant-specific namespace.
pub const PUBLIC_TENANT: &str = "public";

/// Longest accepted identifier, in bytes.
///
/// PostgreSQL silently truncates identifiers to 63 bytes, which would make two
/// long ids that share a prefix resolve to the same schema.
pub const MAX_TENANT_ID_LEN: usize = 63;

static TENANT_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_-]+$").unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// A tenant identifier that passed validation. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// The default `public` tenant.
    #[must_use]
    pub fn public() -> Self {
        Self(PUBLIC_TENANT.to_string())
    }

    /// Validates `candidate` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::InvalidTenantId`] if the candidate is empty,
    /// too long, or contains anything outside `[a-z0-9_-]`.
    pub fn parse(candidate: &str) -> Result<Self, TenantError> {
        validate(candidate)
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the default `public` namespace.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.0 == PUBLIC_TENANT
    }
}

/// Validates a candidate tenant id.
///
/// Pure function: no normalization is applied here. Callers that accept
/// user input in other cases (e.g. request headers) lowercase first.
///
/// # Errors
///
/// Returns [`TenantError::InvalidTenantId`] carrying the rejected candidate.
pub fn validate(candidate: &str) -> Result<TenantId, TenantError> {
    if candidate.len() > MAX_TENANT_ID_LEN || !TENANT_ID_PATTERN.is_match(candidate) {
        return Err(TenantError::InvalidTenantId {
            candidate: candidate.to_string(),
        });
    }
    Ok(TenantId(candidate.to_string()))
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TenantId {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}
