//! Per-tenant storage client cache with in-flight creation dedup.
//!
//! `get_client` resolves in one of three ways:
//! 1. a cached client is returned without suspending
//! 2. a creation already in flight for the tenant is joined
//! 3. a new creation is registered under the `pending` entry lock and run on
//!    its own task, so a caller that is dropped mid-wait never cancels it
//!
//! Every caller joined to one creation receives the same outcome. Failures
//! are never cached: the pending slot is always cleared, so the next call
//! starts over.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cameyo_core::{TenantError, TenantId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use super::context::TenantContext;
use super::provisioner::SchemaProvisioner;
use crate::traits::{ClientConnector, StorageClient};

/// `None` until the creation task publishes its result.
type Outcome<T> = Option<Result<T, TenantError>>;

/// A connected client plus bookkeeping for idle eviction.
#[derive(Debug)]
struct ClientEntry<T> {
    client: T,
    created_at: Instant,
    last_used: Mutex<Instant>,
}

impl<T: Clone> ClientEntry<T> {
    fn new(client: T) -> Self {
        let now = Instant::now();
        Self {
            client,
            created_at: now,
            last_used: Mutex::new(now),
        }
    }

    fn touch(&self) -> T {
        *self.last_used.lock() = Instant::now();
        self.client.clone()
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }
}

struct RegistryInner<C: ClientConnector> {
    connector: Arc<C>,
    provisioner: Arc<SchemaProvisioner>,
    clients: DashMap<TenantId, Arc<ClientEntry<C::Client>>>,
    pending: DashMap<TenantId, watch::Receiver<Outcome<C::Client>>>,
    closed: AtomicBool,
    connections_opened: AtomicU64,
}

impl<C: ClientConnector> RegistryInner<C> {
    fn lookup(&self, tenant: &TenantId) -> Option<C::Client> {
        self.clients.get(tenant).map(|entry| entry.touch())
    }

    async fn establish(&self, tenant: &TenantId) -> Result<C::Client, TenantError> {
        self.provisioner.ensure_schema(tenant).await?;
        let client = self
            .connector
            .connect(tenant)
            .await
            .map_err(|e| TenantError::connection(tenant, e))?;
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        Ok(client)
    }

    async fn create(&self, tenant: &TenantId, tx: watch::Sender<Outcome<C::Client>>) {
        let slot = PendingSlot {
            pending: &self.pending,
            tenant,
        };

        let outcome = match self.establish(tenant).await {
            Ok(client) if self.closed.load(Ordering::Acquire) => {
                // Shut down while connecting; nobody would ever disconnect it.
                if let Err(e) = client.disconnect().await {
                    warn!(error = %format!("{e:#}"), "Failed to disconnect orphaned client");
                }
                Err(TenantError::RegistryClosed)
            }
            Ok(client) => {
                self.clients
                    .insert(tenant.clone(), Arc::new(ClientEntry::new(client.clone())));
                info!("Storage client ready");
                Ok(client)
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Storage client creation failed");
                Err(e)
            }
        };

        // Clear the slot before publishing so a woken caller that retries
        // after a failure starts a fresh creation instead of rejoining this one.
        drop(slot);
        tx.send_replace(Some(outcome));
    }
}

/// Removes the pending entry when creation finishes, even by panic.
struct PendingSlot<'a, T> {
    pending: &'a DashMap<TenantId, watch::Receiver<Outcome<T>>>,
    tenant: &'a TenantId,
}

impl<T> Drop for PendingSlot<'_, T> {
    fn drop(&mut self) {
        self.pending.remove(self.tenant);
    }
}

/// Shared registry of tenant storage clients. Cloning is cheap.
pub struct TenantClientRegistry<C: ClientConnector> {
    inner: Arc<RegistryInner<C>>,
}

impl<C: ClientConnector> Clone for TenantClientRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ClientConnector> TenantClientRegistry<C> {
    #[must_use]
    pub fn new(connector: Arc<C>, provisioner: Arc<SchemaProvisioner>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connector,
                provisioner,
                clients: DashMap::new(),
                pending: DashMap::new(),
                closed: AtomicBool::new(false),
                connections_opened: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the connected client for `tenant`, creating it on first use.
    ///
    /// # Errors
    ///
    /// - [`TenantError::RegistryClosed`] after [`shutdown`](Self::shutdown)
    /// - any error from schema checking or provisioning
    /// - [`TenantError::ConnectionFailure`] if the client cannot connect
    pub async fn get_client(&self, tenant: &TenantId) -> Result<C::Client, TenantError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TenantError::RegistryClosed);
        }
        if let Some(client) = self.inner.lookup(tenant) {
            return Ok(client);
        }

        let (mut rx, tx) = match self.inner.pending.entry(tenant.clone()) {
            Entry::Occupied(pending) => (pending.get().clone(), None),
            Entry::Vacant(slot) => {
                // A creation may have completed between the lookup and taking
                // the entry lock.
                if let Some(client) = self.inner.lookup(tenant) {
                    return Ok(client);
                }
                let (tx, rx) = watch::channel(None);
                slot.insert(rx.clone());
                (rx, Some(tx))
            }
        };

        if let Some(tx) = tx {
            debug!(tenant = %tenant, "Creating storage client");
            let inner = Arc::clone(&self.inner);
            let owned = tenant.clone();
            let span = info_span!("tenant_client", tenant = %tenant);
            tokio::spawn(async move { inner.create(&owned, tx).await }.instrument(span));
        }

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map(|published| (*published).clone())
            .map_err(|_| {
                TenantError::connection(tenant, "creation task ended without an outcome")
            })?;
        outcome.unwrap_or_else(|| {
            Err(TenantError::connection(tenant, "creation finished without a result"))
        })
    }

    /// Client for the tenant of the current [`TenantContext`] scope
    /// (`public` outside any scope).
    ///
    /// # Errors
    ///
    /// Same as [`get_client`](Self::get_client).
    pub async fn current_client(&self) -> Result<C::Client, TenantError> {
        self.get_client(&TenantContext::current()).await
    }

    /// Disconnects and removes clients not used for at least `max_idle`.
    ///
    /// A caller that obtained a clone just before eviction keeps a handle to
    /// a disconnected client; its next `get_client` creates a fresh one.
    /// Returns the number of evicted clients.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let candidates: Vec<TenantId> = self
            .inner
            .clients
            .iter()
            .filter(|entry| entry.value().idle_for() >= max_idle)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for tenant in candidates {
            let Some((_, entry)) = self
                .inner
                .clients
                .remove_if(&tenant, |_, entry| entry.idle_for() >= max_idle)
            else {
                continue;
            };
            if let Err(e) = entry.client.disconnect().await {
                warn!(tenant = %tenant, error = %format!("{e:#}"), "Failed to disconnect idle client");
            }
            debug!(tenant = %tenant, age = ?entry.created_at.elapsed(), "Evicted idle client");
            evicted += 1;
        }
        if evicted > 0 {
            info!(evicted, "Evicted idle storage clients");
        }
        evicted
    }

    /// Disconnects every cached client and clears all bookkeeping.
    ///
    /// Later `get_client` calls fail with [`TenantError::RegistryClosed`].
    /// A creation still in flight disconnects its own client when it finishes.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);

        // Entries inserted by a creation that passed the closed check before
        // it was set are picked up by a later round.
        let mut disconnected = 0usize;
        while !self.inner.clients.is_empty() {
            let tenants: Vec<TenantId> =
                self.inner.clients.iter().map(|e| e.key().clone()).collect();
            for tenant in tenants {
                if let Some((_, entry)) = self.inner.clients.remove(&tenant) {
                    match entry.client.disconnect().await {
                        Ok(()) => disconnected += 1,
                        Err(e) => {
                            warn!(tenant = %tenant, error = %format!("{e:#}"), "Failed to disconnect client");
                        }
                    }
                }
            }
        }
        info!(disconnected, "Tenant client registry shut down");
    }

    /// Number of cached clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.clients.is_empty()
    }

    /// Number of creations in flight.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    /// Whether a client for `tenant` is cached.
    #[must_use]
    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.inner.clients.contains_key(tenant)
    }

    /// Cached tenant ids, sorted.
    #[must_use]
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self.inner.clients.iter().map(|e| e.key().clone()).collect();
        tenants.sort();
        tenants
    }

    /// Total clients successfully connected over the registry's lifetime.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.inner.connections_opened.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The provisioner used on the creation path.
    #[must_use]
    pub fn provisioner(&self) -> &Arc<SchemaProvisioner> {
        &self.inner.provisioner
    }
}

impl<C: ClientConnector> std::fmt::Debug for TenantClientRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantClientRegistry")
            .field("clients", &self.len())
            .field("pending", &self.pending_len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use cameyo_core::MigrationSet;

    use super::*;
    use crate::storage::{MemoryBackend, MemoryClient};
    use crate::tenant::ProvisionPolicy;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    fn registry(
        backend: &MemoryBackend,
        policy: ProvisionPolicy,
    ) -> TenantClientRegistry<MemoryBackend> {
        let provisioner = SchemaProvisioner::new(
            Arc::new(backend.clone()),
            policy,
            Arc::new(MigrationSet::marketplace()),
        );
        TenantClientRegistry::new(Arc::new(backend.clone()), Arc::new(provisioner))
    }

    #[tokio::test]
    async fn second_call_reuses_cached_client() {
        let backend = MemoryBackend::new().with_schema(&tenant("acme"));
        let registry = registry(&backend, ProvisionPolicy::FailClosed);

        let first = registry.get_client(&tenant("acme")).await.unwrap();
        let checks = backend.existence_check_count();
        let second = registry.get_client(&tenant("acme")).await.unwrap();

        assert_eq!(first.connection_id(), second.connection_id());
        assert_eq!(backend.connect_count(), 1);
        assert_eq!(backend.existence_check_count(), checks);
        assert_eq!(registry.tenants(), vec![tenant("acme")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_share_one_creation() {
        let backend = MemoryBackend::new().with_schema(&tenant("acme-1"));
        backend.set_latency(Duration::from_millis(20));
        let registry = registry(&backend, ProvisionPolicy::FailClosed);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_client(&tenant("acme-1")).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            let client: MemoryClient = handle.await.unwrap().unwrap();
            ids.push(client.connection_id());
        }

        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(backend.connect_count(), 1);
        assert_eq!(backend.existence_check_count(), 1);
        assert_eq!(registry.connections_opened(), 1);
        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn missing_schema_leaves_no_entry() {
        let backend = MemoryBackend::new();
        let registry = registry(&backend, ProvisionPolicy::FailClosed);

        let err = registry.get_client(&tenant("initech")).await.unwrap_err();
        assert!(matches!(err, TenantError::SchemaNotProvisioned { .. }));
        assert!(registry.is_empty());
        assert_eq!(registry.pending_len(), 0);
        assert_eq!(backend.connect_count(), 0);
    }

    #[tokio::test]
    async fn connection_failure_is_not_cached() {
        let backend = MemoryBackend::new();
        let registry = registry(&backend, ProvisionPolicy::FailClosed);

        backend.set_fail_connect(true);
        let err = registry.get_client(&TenantId::public()).await.unwrap_err();
        assert!(matches!(err, TenantError::ConnectionFailure { .. }));
        assert!(err.to_string().contains("injected fault"));
        assert!(registry.is_empty());

        backend.set_fail_connect(false);
        registry.get_client(&TenantId::public()).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(backend.connect_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_share_one_failure() {
        let backend = MemoryBackend::new().with_schema(&tenant("acme"));
        backend.set_latency(Duration::from_millis(20));
        backend.set_fail_connect(true);
        let registry = registry(&backend, ProvisionPolicy::FailClosed);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_client(&tenant("acme")).await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, TenantError::ConnectionFailure { .. }), "{err}");
        }
        assert_eq!(backend.existence_check_count(), 1);
        assert_eq!(backend.connect_count(), 0);
        assert_eq!(registry.pending_len(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn auto_provision_creates_schema_on_first_use() {
        let backend = MemoryBackend::new();
        let registry = registry(&backend, ProvisionPolicy::AutoProvision);

        registry.get_client(&tenant("globex")).await.unwrap();
        assert!(backend.has_schema(&tenant("globex")));
        assert_eq!(backend.migrations_applied(), 4);
    }

    #[tokio::test]
    async fn tenants_never_share_clients() {
        let backend = MemoryBackend::new()
            .with_schema(&tenant("acme"))
            .with_schema(&tenant("globex"));
        let registry = registry(&backend, ProvisionPolicy::FailClosed);

        let acme = registry.get_client(&tenant("acme")).await.unwrap();
        let globex = registry.get_client(&tenant("globex")).await.unwrap();
        assert_ne!(acme.connection_id(), globex.connection_id());

        acme.put("users", "u1", serde_json::json!({"email": "a@acme.com"})).unwrap();
        assert!(globex.get("users", "u1").unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_caller_does_not_cancel_creation() {
        let backend = MemoryBackend::new().with_schema(&tenant("acme"));
        backend.set_latency(Duration::from_millis(50));
        let registry = registry(&backend, ProvisionPolicy::FailClosed);

        let caller = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_client(&tenant("acme")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();

        registry.get_client(&tenant("acme")).await.unwrap();
        assert_eq!(backend.connect_count(), 1);
    }

    #[tokio::test]
    async fn current_client_follows_context() {
        let backend = MemoryBackend::new().with_schema(&tenant("acme"));
        let registry = registry(&backend, ProvisionPolicy::FailClosed);

        let client = TenantContext::run(tenant("acme"), registry.current_client())
            .await
            .unwrap();
        assert_eq!(client.namespace(), &tenant("acme"));

        let public = registry.current_client().await.unwrap();
        assert!(public.namespace().is_public());
    }

    #[tokio::test]
    async fn shutdown_disconnects_everything() {
        let backend = MemoryBackend::new()
            .with_schema(&tenant("acme"))
            .with_schema(&tenant("globex"));
        let registry = registry(&backend, ProvisionPolicy::FailClosed);

        let acme = registry.get_client(&tenant("acme")).await.unwrap();
        registry.get_client(&tenant("globex")).await.unwrap();
        registry.shutdown().await;

        assert!(acme.is_closed());
        assert_eq!(backend.disconnect_count(), 2);
        assert!(registry.is_empty());
        assert!(registry.is_closed());
        assert_eq!(
            registry.get_client(&tenant("acme")).await.unwrap_err(),
            TenantError::RegistryClosed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_during_creation_leaves_no_open_client() {
        let backend = MemoryBackend::new()
            .with_schema(&tenant("acme"))
            .with_schema(&tenant("globex"));
        let registry = registry(&backend, ProvisionPolicy::FailClosed);
        registry.get_client(&tenant("acme")).await.unwrap();

        backend.set_latency(Duration::from_millis(50));
        let caller = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_client(&tenant("globex")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.shutdown().await;

        let outcome = caller.await.unwrap();
        assert_eq!(outcome.unwrap_err(), TenantError::RegistryClosed);
        assert!(registry.is_empty());
        assert_eq!(registry.pending_len(), 0);
        assert_eq!(backend.disconnect_count(), backend.connect_count());
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_removes_only_stale_clients() {
        let backend = MemoryBackend::new()
            .with_schema(&tenant("acme"))
            .with_schema(&tenant("globex"));
        let registry = registry(&backend, ProvisionPolicy::FailClosed);

        let acme = registry.get_client(&tenant("acme")).await.unwrap();
        registry.get_client(&tenant("globex")).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        registry.get_client(&tenant("globex")).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;

        assert_eq!(registry.evict_idle(Duration::from_secs(60)).await, 1);
        assert!(acme.is_closed());
        assert_eq!(registry.tenants(), vec![tenant("globex")]);

        let fresh = registry.get_client(&tenant("acme")).await.unwrap();
        assert_ne!(fresh.connection_id(), acme.connection_id());
    }
}
