use async_trait::async_trait;
use cameyo_core::{MigrationSet, TenantId};

/// A live, connected handle to one tenant's namespace.
///
/// Handles are cheap to clone and every clone refers to the same underlying
/// connection (pool). The registry hands clones to callers and keeps one for
/// itself until shutdown.
#[async_trait]
pub trait StorageClient: Clone + Send + Sync + 'static {
    /// The namespace this client is bound to.
    fn namespace(&self) -> &TenantId;

    /// Close the underlying connection(s).
    async fn disconnect(&self) -> anyhow::Result<()>;
}

/// Opens storage clients bound to a tenant namespace.
/// Implementations: `PostgreSQL` (`sqlx` pool per tenant), memory (tests, dev).
#[async_trait]
pub trait ClientConnector: Send + Sync + 'static {
    /// The client type produced by this connector.
    type Client: StorageClient;

    /// Open and connect a client whose connection target is scoped to `tenant`.
    async fn connect(&self, tenant: &TenantId) -> anyhow::Result<Self::Client>;
}

/// Namespace metadata and provisioning operations on the backing store.
#[async_trait]
pub trait SchemaCatalog: Send + Sync + 'static {
    /// Whether a schema named exactly `schema` exists.
    async fn schema_exists(&self, schema: &TenantId) -> anyhow::Result<bool>;

    /// Create `schema` if missing and apply every migration of `migrations`
    /// not yet recorded in it. Must be idempotent.
    ///
    /// Returns the versions applied by this call (empty if already current).
    async fn provision(
        &self,
        schema: &TenantId,
        migrations: &MigrationSet,
    ) -> anyhow::Result<Vec<u32>>;
}
