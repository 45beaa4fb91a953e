//! HTTP mapping of tenant routing failures.
//!
//! Bodies are JSON: `{ "statusCode", "error", "message", "tenant" }`.
//! Client errors log at `warn`, server errors at `error` with the tenant and
//! the full reason.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cameyo_core::TenantError;
use serde_json::json;
use tracing::{error, warn};

/// Errors surfaced by the tenant middleware and extractors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resolution or client acquisition failed.
    #[error(transparent)]
    Tenant(#[from] TenantError),
    /// A tenant extractor ran on a route without the tenant middleware.
    #[error("tenant was not resolved for this route")]
    TenantNotResolved,
    /// The server is draining and accepts no new API requests.
    #[error("server is shutting down")]
    ShuttingDown,
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Tenant(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Tenant(TenantError::RegistryClosed) | Self::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Tenant(_) | Self::TenantNotResolved => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Tenant(e) => {
                let tenant = e.tenant().map(|t| t.as_str().to_string());
                if status.is_client_error() {
                    warn!(kind = e.kind(), "{e}");
                    json!({
                        "statusCode": status.as_u16(),
                        "error": e.kind(),
                        "message": e.to_string(),
                        "tenant": tenant,
                    })
                } else {
                    error!(tenant = ?tenant, kind = e.kind(), reason = %e, "Tenant request failed");
                    json!({
                        "statusCode": status.as_u16(),
                        "error": e.kind(),
                        "message": public_message(e),
                        "tenant": tenant,
                    })
                }
            }
            Self::TenantNotResolved => {
                error!("Tenant extractor used on a route without tenant resolution");
                json!({
                    "statusCode": status.as_u16(),
                    "error": "TenantNotResolved",
                    "message": self.to_string(),
                    "tenant": null,
                })
            }
            Self::ShuttingDown => json!({
                "statusCode": status.as_u16(),
                "error": "ShuttingDown",
                "message": self.to_string(),
                "tenant": null,
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Server-side reasons can carry connection details; keep them in logs only.
fn public_message(e: &TenantError) -> String {
    match e {
        TenantError::InvalidTenantId { .. }
        | TenantError::SchemaNotProvisioned { .. }
        | TenantError::RegistryClosed => e.to_string(),
        TenantError::ProvisioningFailure { tenant, .. } => {
            format!("failed to provision schema \"{tenant}\"")
        }
        TenantError::ConnectionFailure { tenant, .. } => {
            format!("storage unavailable for tenant \"{tenant}\"")
        }
    }
}
