//! Request-scoped tenant identity.
//!
//! The tenant is held in a tokio task-local, so it follows the request future
//! across `.await` points and worker threads without any shared mutable
//! state. Concurrent requests on the same runtime each see only their own
//! tenant. Outside any scope the current tenant is `public`.

use std::future::Future;

use cameyo_core::TenantId;
use tokio::task::JoinHandle;

tokio::task_local! {
    static CURRENT_TENANT: TenantId;
}

/// Entry points for the task-local tenant scope.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext;

impl TenantContext {
    /// Runs `fut` with `tenant` as the current tenant for its whole extent.
    ///
    /// Scopes nest: an inner `run` shadows the outer tenant until it returns.
    pub async fn run<F: Future>(tenant: TenantId, fut: F) -> F::Output {
        CURRENT_TENANT.scope(tenant, fut).await
    }

    /// Synchronous counterpart of [`run`](Self::run).
    pub fn run_sync<R>(tenant: TenantId, f: impl FnOnce() -> R) -> R {
        CURRENT_TENANT.sync_scope(tenant, f)
    }

    /// The current tenant, or `None` outside any scope.
    #[must_use]
    pub fn try_current() -> Option<TenantId> {
        CURRENT_TENANT.try_with(Clone::clone).ok()
    }

    /// The current tenant, defaulting to `public` outside any scope.
    #[must_use]
    pub fn current() -> TenantId {
        Self::try_current().unwrap_or_else(TenantId::public)
    }

    /// Spawns `fut` on the runtime inside the caller's tenant scope.
    ///
    /// Plain `tokio::spawn` does not carry task-locals into the new task.
    pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match Self::try_current() {
            Some(tenant) => tokio::spawn(CURRENT_TENANT.scope(tenant, fut)),
            None => tokio::spawn(fut),
        }
    }
}
