//! Maps an incoming request to a tenant id.
//!
//! Priority, first match wins:
//! 1. the tenant header (default `X-Tenant-ID`), trimmed and lowercased;
//!    a blank header resolves to `public`
//! 2. the first label of the `Host` when it is a dotted name that does not
//!    start with an IPv4 address
//! 3. `public`

use std::fmt;
use std::net::IpAddr;

use axum::http::header::{InvalidHeaderName, HOST};
use axum::http::{HeaderMap, HeaderName, Uri};
use cameyo_core::{TenantError, TenantId};
use serde::Serialize;

use super::config::DEFAULT_TENANT_HEADER;

/// Where a resolved tenant id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantSource {
    Header,
    Subdomain,
    Default,
}

impl TenantSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Subdomain => "subdomain",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for TenantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated tenant id plus the part of the request it was taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTenant {
    pub tenant: TenantId,
    pub source: TenantSource,
}

impl ResolvedTenant {
    fn public() -> Self {
        Self {
            tenant: TenantId::public(),
            source: TenantSource::Default,
        }
    }
}

/// Header/subdomain tenant resolver. Stateless apart from the header name.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    header: HeaderName,
}

impl TenantResolver {
    /// Resolver reading the tenant from `header_name` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if `header_name` is not a valid HTTP header name.
    pub fn new(header_name: &str) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            header: HeaderName::try_from(header_name)?,
        })
    }

    /// The header consulted first.
    #[must_use]
    pub fn header_name(&self) -> &HeaderName {
        &self.header
    }

    /// Resolves the tenant for a request.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::InvalidTenantId`] when the header or subdomain
    /// candidate fails validation. Nothing falls back to `public` once a
    /// non-empty candidate has been found.
    pub fn resolve(&self, headers: &HeaderMap, uri: &Uri) -> Result<ResolvedTenant, TenantError> {
        if let Some(value) = headers.get(&self.header) {
            let raw = value.to_str().map_err(|_| TenantError::InvalidTenantId {
                candidate: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            })?;
            let trimmed = raw.trim();
            // A present header always wins over the host, even when blank.
            if trimmed.is_empty() {
                return Ok(ResolvedTenant::public());
            }
            return Ok(ResolvedTenant {
                tenant: normalize(trimmed)?,
                source: TenantSource::Header,
            });
        }

        let host = headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| uri.authority().map(|a| a.as_str()));

        match host.and_then(subdomain_label) {
            Some("") | None => Ok(ResolvedTenant::public()),
            Some(label) => Ok(ResolvedTenant {
                tenant: normalize(label)?,
                source: TenantSource::Subdomain,
            }),
        }
    }
}

impl Default for TenantResolver {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static(DEFAULT_TENANT_HEADER),
        }
    }
}

fn normalize(candidate: &str) -> Result<TenantId, TenantError> {
    cameyo_core::validate(&candidate.to_ascii_lowercase())
}

/// First label of a dotted host name, or `None` for IP literals, names
/// starting with an IPv4 address (`10.0.0.7.nip.io`) and single-label hosts
/// such as `localhost`.
fn subdomain_label(host: &str) -> Option<&str> {
    let host = host.trim();
    if host.starts_with('[') {
        return None;
    }
    // Drop userinfo when the fallback came from a URI authority.
    let host = host.rsplit_once('@').map_or(host, |(_, h)| h);
    let name = host.split_once(':').map_or(host, |(name, _)| name);
    if name.parse::<IpAddr>().is_ok() || starts_with_ipv4(name) || !name.contains('.') {
        return None;
    }
    name.split('.').next()
}

/// True when the first four labels are all non-empty digit runs.
fn starts_with_ipv4(name: &str) -> bool {
    let labels: Vec<&str> = name.split('.').take(4).collect();
    labels.len() == 4
        && labels
            .iter()
            .all(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit()))
}
