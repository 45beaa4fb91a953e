//! Network module with deferred startup lifecycle.
//!
//! `new()` wires shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until shutdown, then drains in-flight
//! requests and closes every tenant client.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::handlers::{
    current_tenant_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::{build_http_layers, resolve_tenant, track_in_flight};
use super::shutdown::ShutdownController;
use crate::tenant::{IdleSweeper, TenantClientRegistry, TenantConfig, TenantResolver};
use crate::traits::ClientConnector;

/// Owns the HTTP server lifecycle for one storage connector type.
///
/// 1. `new()` builds the resolver and shutdown controller around a registry
/// 2. `start()` binds the listener
/// 3. `serve()` runs until the shutdown future resolves
///
/// Application routes added with [`with_api_routes`](Self::with_api_routes)
/// are mounted under `/api` behind tenant resolution.
pub struct NetworkModule<C: ClientConnector> {
    config: NetworkConfig,
    tenant: TenantConfig,
    listener: Option<TcpListener>,
    registry: TenantClientRegistry<C>,
    resolver: Arc<TenantResolver>,
    shutdown: Arc<ShutdownController>,
    api_routes: Router<AppState<C>>,
}

impl<C: ClientConnector> NetworkModule<C> {
    /// Creates the module without binding any port.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured tenant header is not a valid
    /// HTTP header name.
    pub fn new(
        config: NetworkConfig,
        tenant: TenantConfig,
        registry: TenantClientRegistry<C>,
    ) -> anyhow::Result<Self> {
        let resolver = TenantResolver::new(&tenant.header_name)
            .with_context(|| format!("invalid tenant header name {:?}", tenant.header_name))?;
        Ok(Self {
            config,
            tenant,
            listener: None,
            registry,
            resolver: Arc::new(resolver),
            shutdown: Arc::new(ShutdownController::new()),
            api_routes: Router::new(),
        })
    }

    /// Adds routes served under `/api` with tenant resolution applied.
    #[must_use]
    pub fn with_api_routes(mut self, routes: Router<AppState<C>>) -> Self {
        self.api_routes = self.api_routes.merge(routes);
        self
    }

    #[must_use]
    pub fn registry(&self) -> TenantClientRegistry<C> {
        self.registry.clone()
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the router.
    ///
    /// Routes:
    /// - `GET /health`, `/health/live`, `/health/ready`: no tenant resolution
    /// - `GET /api/tenant` plus any application routes: draining guard, then
    ///   tenant resolution and eager client acquisition
    pub fn build_router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            resolver: Arc::clone(&self.resolver),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        let api = self
            .api_routes
            .clone()
            .route("/tenant", get(current_tenant_handler))
            .route_layer(from_fn_with_state(state.clone(), resolve_tenant::<C>))
            .route_layer(from_fn_with_state(
                Arc::clone(&self.shutdown),
                track_in_flight,
            ));

        Router::new()
            .route("/health", get(health_handler::<C>))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler::<C>))
            .nest("/api", api)
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the TCP listener. Returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves.
    ///
    /// When it does:
    /// 1. health moves to `Draining` and new API requests get 503
    /// 2. in-flight requests get up to `drain_timeout` to finish
    /// 3. the idle sweeper stops and every tenant client is disconnected
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, TLS material cannot be
    /// loaded, or the server hits a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .context("start() must be called before serve()")?;
        let router = self.build_router();

        let mut sweeper = self.tenant.idle_timeout.map(|max_idle| {
            info!(?max_idle, interval = ?self.tenant.sweep_interval, "Idle client eviction enabled");
            IdleSweeper::start(self.registry.clone(), max_idle, self.tenant.sweep_interval)
        });

        let ctrl = Arc::clone(&self.shutdown);
        let signal = async move {
            shutdown.await;
            ctrl.trigger_shutdown();
        };

        self.shutdown.set_ready();

        let served = match &self.config.tls {
            Some(tls) => serve_tls(listener, router, tls, signal).await,
            None => serve_plain(listener, router, signal).await,
        };

        self.shutdown.trigger_shutdown();
        if self.shutdown.wait_for_drain(self.config.drain_timeout).await {
            info!("All in-flight requests drained");
        } else {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "Drain timeout expired with in-flight requests remaining"
            );
        }
        if let Some(sweeper) = sweeper.as_mut() {
            sweeper.stop().await;
        }
        self.registry.shutdown().await;
        served
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP connections");
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await?;
    Ok(())
}

/// Serves TLS via `axum-server` with rustls, reusing the pre-bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .context("failed to load TLS certificates")?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        signal.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!("Serving TLS connections on {}", addr);

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}
