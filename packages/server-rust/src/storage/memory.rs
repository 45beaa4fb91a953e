//! In-memory backend implementing both [`SchemaCatalog`] and [`ClientConnector`].
//!
//! [`MemoryBackend`] keeps one set of tables per schema, so clients bound to
//! different tenants see disjoint data exactly like schema-per-tenant
//! `PostgreSQL`. It counts connections, disconnections, and migration
//! applications, and can inject connect/provision faults, which makes it the
//! backend of choice for tests and for running the server without a database.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use cameyo_core::{MigrationSet, TenantId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::traits::{ClientConnector, SchemaCatalog, StorageClient};

type Table = DashMap<String, Value>;

#[derive(Debug, Default)]
struct MemorySchema {
    applied: Mutex<Vec<u32>>,
    tables: DashMap<String, Table>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    schemas: DashMap<TenantId, Arc<MemorySchema>>,
    connects: AtomicU64,
    disconnects: AtomicU64,
    existence_checks: AtomicU64,
    migrations_applied: AtomicU64,
    fail_connect: AtomicBool,
    fail_provision: AtomicBool,
    latency: Mutex<Duration>,
}

impl MemoryInner {
    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Shared in-memory store. Cloning yields another handle to the same data.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl MemoryBackend {
    /// Creates a backend containing only the `public` schema.
    #[must_use]
    pub fn new() -> Self {
        let backend = Self {
            inner: Arc::new(MemoryInner::default()),
        };
        backend.create_schema(&TenantId::public());
        backend
    }

    /// Creates `schema` out of band, as an administrator would.
    pub fn create_schema(&self, schema: &TenantId) {
        self.inner.schemas.entry(schema.clone()).or_default();
    }

    /// Builder form of [`create_schema`](Self::create_schema).
    #[must_use]
    pub fn with_schema(self, schema: &TenantId) -> Self {
        self.create_schema(schema);
        self
    }

    /// Makes subsequent `connect` calls fail (or succeed again).
    pub fn set_fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `provision` calls fail (or succeed again).
    pub fn set_fail_provision(&self, fail: bool) {
        self.inner.fail_provision.store(fail, Ordering::SeqCst);
    }

    /// Adds an artificial delay to every catalog and connect call.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    /// Number of successful `connect` calls.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of clients disconnected.
    #[must_use]
    pub fn disconnect_count(&self) -> u64 {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    /// Number of `schema_exists` calls.
    #[must_use]
    pub fn existence_check_count(&self) -> u64 {
        self.inner.existence_checks.load(Ordering::SeqCst)
    }

    /// Total migration applications across all schemas.
    #[must_use]
    pub fn migrations_applied(&self) -> u64 {
        self.inner.migrations_applied.load(Ordering::SeqCst)
    }

    /// Whether `schema` exists, without touching the counters.
    #[must_use]
    pub fn has_schema(&self, schema: &TenantId) -> bool {
        self.inner.schemas.contains_key(schema)
    }

    /// Versions recorded as applied in `schema`.
    #[must_use]
    pub fn applied_versions(&self, schema: &TenantId) -> Vec<u32> {
        self.inner
            .schemas
            .get(schema)
            .map(|s| s.applied.lock().clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaCatalog for MemoryBackend {
    async fn schema_exists(&self, schema: &TenantId) -> anyhow::Result<bool> {
        self.inner.existence_checks.fetch_add(1, Ordering::SeqCst);
        self.inner.simulate_latency().await;
        Ok(self.inner.schemas.contains_key(schema))
    }

    async fn provision(
        &self,
        schema: &TenantId,
        migrations: &MigrationSet,
    ) -> anyhow::Result<Vec<u32>> {
        self.inner.simulate_latency().await;
        if self.inner.fail_provision.load(Ordering::SeqCst) {
            bail!("injected provisioning fault");
        }

        let target = Arc::clone(&self.inner.schemas.entry(schema.clone()).or_default());
        let mut applied = target.applied.lock();
        let newly: Vec<u32> = migrations
            .pending(&applied)
            .map(|m| m.version)
            .collect();
        applied.extend_from_slice(&newly);
        self.inner
            .migrations_applied
            .fetch_add(newly.len() as u64, Ordering::SeqCst);
        Ok(newly)
    }
}

#[async_trait]
impl ClientConnector for MemoryBackend {
    type Client = MemoryClient;

    async fn connect(&self, tenant: &TenantId) -> anyhow::Result<MemoryClient> {
        self.inner.simulate_latency().await;
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            bail!("connection refused (injected fault)");
        }
        let connection_id = self.inner.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemoryClient {
            backend: Arc::clone(&self.inner),
            namespace: tenant.clone(),
            connection_id,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Client bound to one schema of a [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemoryClient {
    backend: Arc<MemoryInner>,
    namespace: TenantId,
    connection_id: u64,
    closed: Arc<AtomicBool>,
}

impl MemoryClient {
    /// Identifier of the underlying connection; clones share it.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Whether `disconnect` has been called on this connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn schema(&self) -> anyhow::Result<Arc<MemorySchema>> {
        if self.is_closed() {
            bail!("client for \"{}\" is disconnected", self.namespace);
        }
        self.backend
            .schemas
            .get(&self.namespace)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| anyhow!("schema \"{}\" does not exist", self.namespace))
    }

    /// Inserts or replaces a row.
    ///
    /// # Errors
    ///
    /// Fails if the client is disconnected or its schema is missing.
    pub fn put(&self, table: &str, key: &str, value: Value) -> anyhow::Result<()> {
        let schema = self.schema()?;
        schema
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    /// Reads a row.
    ///
    /// # Errors
    ///
    /// Fails if the client is disconnected or its schema is missing.
    pub fn get(&self, table: &str, key: &str) -> anyhow::Result<Option<Value>> {
        let schema = self.schema()?;
        Ok(schema
            .tables
            .get(table)
            .and_then(|t| t.get(key).map(|v| v.value().clone())))
    }

    /// Lists row keys in `table`, sorted.
    ///
    /// # Errors
    ///
    /// Fails if the client is disconnected or its schema is missing.
    pub fn keys(&self, table: &str) -> anyhow::Result<Vec<String>> {
        let schema = self.schema()?;
        let mut keys: Vec<String> = schema
            .tables
            .get(table)
            .map(|t| t.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl StorageClient for MemoryClient {
    fn namespace(&self) -> &TenantId {
        &self.namespace
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.backend.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
