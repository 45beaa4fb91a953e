//! HTTP handlers and the shared [`AppState`].

pub mod health;
pub mod tenant;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use tenant::current_tenant_handler;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::FromRef;

use super::{NetworkConfig, ShutdownController};
use crate::tenant::{TenantClientRegistry, TenantResolver};
use crate::traits::ClientConnector;

/// Shared application state passed to handlers and middleware.
///
/// Every field is a cheap handle, so cloning per request is fine.
pub struct AppState<C: ClientConnector> {
    /// Per-tenant storage clients.
    pub registry: TenantClientRegistry<C>,
    /// Header/subdomain tenant resolution.
    pub resolver: Arc<TenantResolver>,
    /// Health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Server start time, for uptime.
    pub start_time: Instant,
}

impl<C: ClientConnector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            resolver: Arc::clone(&self.resolver),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
        }
    }
}

impl<C: ClientConnector> FromRef<AppState<C>> for TenantClientRegistry<C> {
    fn from_ref(state: &AppState<C>) -> Self {
        state.registry.clone()
    }
}
