//! HTTP middleware for the Cameyo server.
//!
//! Two groups:
//! - [`build_http_layers`]: transport-level Tower layers applied to every route
//! - [`track_in_flight`] and [`resolve_tenant`]: request-level guards on `/api`
//!
//! Layer ordering follows the outer-to-inner convention: the first layer
//! listed processes the request first and the response last.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info_span, Instrument};

use super::config::NetworkConfig;
use super::error::ApiError;
use super::handlers::AppState;
use super::shutdown::ShutdownController;
use crate::tenant::TenantContext;
use crate::traits::ClientConnector;

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            CorsLayer,
            tower::layer::util::Stack<
                CompressionLayer,
                tower::layer::util::Stack<
                    TraceLayer<
                        tower_http::classify::SharedClassifier<
                            tower_http::classify::ServerErrorsAsFailures,
                        >,
                    >,
                    tower::layer::util::Stack<
                        SetRequestIdLayer<MakeRequestUuid>,
                        tower::layer::util::Identity,
                    >,
                >,
            >,
        >,
    >,
>;

/// Builds the HTTP-level Tower middleware stack from the network configuration.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` to every incoming request
/// 2. `Tracing` -- logs request/response with structured trace spans
/// 3. `Compression` -- gzip response compression for bandwidth savings
/// 4. `CORS` -- Cross-Origin Resource Sharing based on configured origins
/// 5. `Timeout` -- enforces a maximum request processing duration
/// 6. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
///
/// Tenant resolution is not part of this stack; it is a route layer on `/api`
/// so health probes never touch tenant storage.
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    let cors = build_cors_layer(&config.cors_origins);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            x_request_id.clone(),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Builds the CORS layer from the configured list of allowed origins.
///
/// `"*"` allows any origin; otherwise unparsable origins are skipped.
/// Request headers are not restricted, so the tenant header passes preflight.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any)
}

/// Rejects API requests with 503 once draining has begun and counts the
/// rest as in flight until their response is produced.
pub async fn track_in_flight(
    State(shutdown): State<Arc<ShutdownController>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(_guard) = shutdown.try_begin_request() else {
        return Err(ApiError::ShuttingDown);
    };
    Ok(next.run(request).await)
}

/// Resolves the request's tenant and acquires its storage client before the
/// handler runs.
///
/// On success the [`ResolvedTenant`](crate::tenant::ResolvedTenant) is
/// stored in the request extensions and the rest of the chain runs inside a
/// [`TenantContext`] scope and a `tenant` span. Invalid ids are rejected with
/// 400, client acquisition failures with 500 (503 after registry shutdown).
pub async fn resolve_tenant<C: ClientConnector>(
    State(state): State<AppState<C>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let resolved = state.resolver.resolve(request.headers(), request.uri())?;
    let tenant = resolved.tenant.clone();
    let span = info_span!("tenant", tenant = %tenant, source = %resolved.source);

    async move {
        state.registry.get_client(&tenant).await?;
        request.extensions_mut().insert(resolved);
        Ok(TenantContext::run(tenant, next.run(request)).await)
    }
    .instrument(span)
    .await
}
