//! Schema-per-tenant `PostgreSQL` backend.
//!
//! A small admin pool on the base connection string answers catalog queries
//! and runs provisioning. Each tenant client is its own [`PgPool`] whose
//! connections start with `search_path` set to the tenant schema.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use cameyo_core::{MigrationSet, TenantId};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Executor;
use tracing::{debug, info};

use super::ConnectionTemplate;
use crate::traits::{ClientConnector, SchemaCatalog, StorageClient};

/// Connection pool sizing applied to every tenant pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum connections per tenant pool.
    pub max_connections: u32,
    /// Connections kept open per tenant pool even when idle.
    pub min_connections: u32,
    /// Maximum time to wait for a connection from the pool.
    pub acquire_timeout: Duration,
    /// Idle time after which a pooled connection is closed.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl PoolSettings {
    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
    }
}

/// `PostgreSQL` catalog and connector.
#[derive(Debug)]
pub struct PgBackend {
    admin: PgPool,
    template: ConnectionTemplate,
    settings: PoolSettings,
}

impl PgBackend {
    /// Connects the admin pool on the template's base connection string.
    ///
    /// # Errors
    ///
    /// Returns an error if the base connection string is invalid or the
    /// database is unreachable.
    pub async fn connect(template: ConnectionTemplate, settings: PoolSettings) -> anyhow::Result<Self> {
        let options = PgConnectOptions::from_str(template.base())
            .context("invalid database connection string")?;
        let admin = settings
            .pool_options()
            .max_connections(2)
            .connect_with(options)
            .await
            .context("failed to connect admin pool")?;
        info!("Connected admin pool");
        Ok(Self {
            admin,
            template,
            settings,
        })
    }

    /// Closes the admin pool.
    pub async fn close(&self) {
        self.admin.close().await;
    }
}

/// Double-quotes a schema name for use in DDL.
fn quote_ident(schema: &TenantId) -> String {
    format!("\"{}\"", schema.as_str().replace('"', "\"\""))
}

#[async_trait]
impl SchemaCatalog for PgBackend {
    async fn schema_exists(&self, schema: &TenantId) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(schema.as_str())
        .fetch_one(&self.admin)
        .await
        .with_context(|| format!("checking whether schema \"{schema}\" exists"))?;
        Ok(exists)
    }

    async fn provision(
        &self,
        schema: &TenantId,
        migrations: &MigrationSet,
    ) -> anyhow::Result<Vec<u32>> {
        let ident = quote_ident(schema);
        let mut tx = self.admin.begin().await?;

        // Serializes provisioners of the same schema across processes.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(schema.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {ident}"))
            .execute(&mut *tx)
            .await
            .context("creating schema")?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {ident}._schema_migrations (\
                version INTEGER PRIMARY KEY, \
                name TEXT NOT NULL, \
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now())"
        ))
        .execute(&mut *tx)
        .await
        .context("creating migration ledger")?;

        let applied: Vec<u32> = sqlx::query_scalar::<_, i32>(&format!(
            "SELECT version FROM {ident}._schema_migrations"
        ))
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .filter_map(|v| u32::try_from(v).ok())
        .collect();

        sqlx::query(&format!("SET LOCAL search_path TO {ident}"))
            .execute(&mut *tx)
            .await?;

        let mut newly = Vec::new();
        for migration in migrations.pending(&applied) {
            debug!(schema = %schema, version = migration.version, name = migration.name, "Applying migration");
            tx.as_mut()
                .execute(sqlx::raw_sql(migration.sql))
                .await
                .with_context(|| format!("migration {} ({})", migration.version, migration.name))?;
            sqlx::query(&format!(
                "INSERT INTO {ident}._schema_migrations (version, name) VALUES ($1, $2)"
            ))
            .bind(i32::try_from(migration.version)?)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
            newly.push(migration.version);
        }

        tx.commit().await.context("committing provisioning transaction")?;
        Ok(newly)
    }
}

#[async_trait]
impl ClientConnector for PgBackend {
    type Client = PgClient;

    async fn connect(&self, tenant: &TenantId) -> anyhow::Result<PgClient> {
        let options = PgConnectOptions::from_str(&self.template.target_for(tenant))
            .context("invalid tenant connection target")?;
        let pool = self
            .settings
            .pool_options()
            .connect_with(options)
            .await
            .context("failed to open tenant pool")?;
        Ok(PgClient {
            pool,
            namespace: tenant.clone(),
        })
    }
}

/// Tenant-scoped connection pool.
#[derive(Debug, Clone)]
pub struct PgClient {
    pool: PgPool,
    namespace: TenantId,
}

impl PgClient {
    /// The pool; every connection has `search_path` set to the tenant schema.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StorageClient for PgClient {
    fn namespace(&self) -> &TenantId {
        &self.namespace
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
