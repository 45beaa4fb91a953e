//! Axum extractors for handlers behind the tenant middleware.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use cameyo_core::TenantId;

use super::registry::TenantClientRegistry;
use super::resolver::{ResolvedTenant, TenantSource};
use crate::network::error::ApiError;
use crate::traits::ClientConnector;

/// The tenant resolved for this request.
///
/// Fails with a 500 when used on a route not covered by the tenant middleware.
#[derive(Debug, Clone)]
pub struct CurrentTenant {
    pub tenant: TenantId,
    pub source: TenantSource,
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentTenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ResolvedTenant>()
            .map(|resolved| Self {
                tenant: resolved.tenant.clone(),
                source: resolved.source,
            })
            .ok_or(ApiError::TenantNotResolved)
    }
}

/// The cached storage client of the request's tenant, for connector `C`.
pub struct TenantClient<C: ClientConnector>(pub C::Client);

impl<S, C> FromRequestParts<S> for TenantClient<C>
where
    S: Send + Sync,
    C: ClientConnector,
    TenantClientRegistry<C>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentTenant { tenant, .. } = CurrentTenant::from_request_parts(parts, state).await?;
        let registry = TenantClientRegistry::<C>::from_ref(state);
        let client = registry.get_client(&tenant).await?;
        Ok(Self(client))
    }
}
