//! Error taxonomy for tenant resolution, provisioning, and client creation.

use crate::tenant_id::TenantId;

/// Errors produced while routing a request to its tenant's storage.
///
/// `Clone` because a single client-creation outcome is delivered to every
/// caller that joined the in-flight creation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TenantError {
    /// Candidate id failed validation. Client input error.
    #[error(
        "Invalid tenant ID: must contain only lowercase letters, numbers, underscores, and hyphens"
    )]
    InvalidTenantId { candidate: String },

    /// The tenant's schema does not exist and the policy forbids creating it.
    #[error("schema \"{tenant}\" does not exist and must be provisioned beforehand")]
    SchemaNotProvisioned { tenant: TenantId },

    /// Schema creation or migration failed.
    #[error("failed to provision schema \"{tenant}\": {reason}")]
    ProvisioningFailure { tenant: TenantId, reason: String },

    /// The backing store could not be reached or the client could not connect.
    #[error("storage connection failed for tenant \"{tenant}\": {reason}")]
    ConnectionFailure { tenant: TenantId, reason: String },

    /// The client registry has been shut down.
    #[error("tenant client registry is shut down")]
    RegistryClosed,
}

impl TenantError {
    /// Builds a [`TenantError::ConnectionFailure`] keeping the full cause chain.
    pub fn connection(tenant: &TenantId, cause: impl std::fmt::Display) -> Self {
        Self::ConnectionFailure {
            tenant: tenant.clone(),
            reason: format!("{cause:#}"),
        }
    }

    /// Builds a [`TenantError::ProvisioningFailure`] keeping the full cause chain.
    pub fn provisioning(tenant: &TenantId, cause: impl std::fmt::Display) -> Self {
        Self::ProvisioningFailure {
            tenant: tenant.clone(),
            reason: format!("{cause:#}"),
        }
    }

    /// Whether the error was caused by the caller's input rather than the server.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidTenantId { .. })
    }

    /// The tenant the error concerns, if it was already resolved.
    #[must_use]
    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            Self::SchemaNotProvisioned { tenant }
            | Self::ProvisioningFailure { tenant, .. }
            | Self::ConnectionFailure { tenant, .. } => Some(tenant),
            Self::InvalidTenantId { .. } | Self::RegistryClosed => None,
        }
    }

    /// Short machine-readable kind, used in logs and response bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTenantId { .. } => "InvalidTenantId",
            Self::SchemaNotProvisioned { .. } => "SchemaNotProvisioned",
            Self::ProvisioningFailure { .. } => "ProvisioningFailure",
            Self::ConnectionFailure { .. } => "ConnectionFailure",
            Self::RegistryClosed => "RegistryClosed",
        }
    }
}
