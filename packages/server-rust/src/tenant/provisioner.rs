//! Ensures a tenant's schema exists before a client is opened for it.

use std::sync::Arc;

use cameyo_core::{MigrationSet, TenantError, TenantId};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::config::ProvisionPolicy;
use crate::traits::SchemaCatalog;

/// Checks and, depending on [`ProvisionPolicy`], creates tenant schemas.
///
/// Provisioning of one tenant is serialized in-process by a per-tenant async
/// mutex; the catalog is expected to guard against other processes itself.
pub struct SchemaProvisioner {
    catalog: Arc<dyn SchemaCatalog>,
    policy: ProvisionPolicy,
    migrations: Arc<MigrationSet>,
    locks: DashMap<TenantId, Arc<tokio::sync::Mutex<()>>>,
}

impl SchemaProvisioner {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        policy: ProvisionPolicy,
        migrations: Arc<MigrationSet>,
    ) -> Self {
        Self {
            catalog,
            policy,
            migrations,
            locks: DashMap::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> ProvisionPolicy {
        self.policy
    }

    #[must_use]
    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    /// Succeeds once `tenant`'s schema is usable.
    ///
    /// `public` is assumed to exist and is never checked. Idempotent, and
    /// safe to call concurrently for the same tenant.
    ///
    /// # Errors
    ///
    /// - [`TenantError::SchemaNotProvisioned`] if the schema is missing under
    ///   [`ProvisionPolicy::FailClosed`]
    /// - [`TenantError::ProvisioningFailure`] if auto-provisioning fails
    /// - [`TenantError::ConnectionFailure`] if the catalog cannot be queried
    pub async fn ensure_schema(&self, tenant: &TenantId) -> Result<(), TenantError> {
        if tenant.is_public() {
            return Ok(());
        }

        match self.policy {
            ProvisionPolicy::FailClosed => {
                let exists = self
                    .catalog
                    .schema_exists(tenant)
                    .await
                    .map_err(|e| TenantError::connection(tenant, e))?;
                if exists {
                    Ok(())
                } else {
                    warn!(tenant = %tenant, "Schema not provisioned");
                    Err(TenantError::SchemaNotProvisioned {
                        tenant: tenant.clone(),
                    })
                }
            }
            ProvisionPolicy::AutoProvision => self.provision(tenant).await.map(drop),
        }
    }

    /// Creates `tenant`'s schema if missing and applies pending migrations.
    ///
    /// Administrative entry point: unlike [`ensure_schema`](Self::ensure_schema)
    /// it also accepts `public`. Returns the versions applied by this call.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::ProvisioningFailure`] with the catalog's cause.
    pub async fn provision(&self, tenant: &TenantId) -> Result<Vec<u32>, TenantError> {
        let lock = Arc::clone(self.locks.entry(tenant.clone()).or_default().value());
        let guard = lock.lock().await;
        let outcome = self.catalog.provision(tenant, &self.migrations).await;
        drop(guard);
        drop(lock);
        // Last holder out removes the lock; the shard lock makes this atomic
        // with respect to `entry` above.
        self.locks.remove_if(tenant, |_, lock| Arc::strong_count(lock) == 1);

        let applied = outcome.map_err(|e| TenantError::provisioning(tenant, e))?;

        if applied.is_empty() {
            debug!(tenant = %tenant, "Schema already current");
        } else {
            info!(tenant = %tenant, versions = ?applied, "Provisioned schema");
        }
        Ok(applied)
    }

    /// Provisions each tenant in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`TenantError::ProvisioningFailure`]; later tenants
    /// are left untouched.
    pub async fn provision_all(
        &self,
        tenants: &[TenantId],
    ) -> Result<Vec<(TenantId, Vec<u32>)>, TenantError> {
        let mut report = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            let applied = self.provision(tenant).await?;
            report.push((tenant.clone(), applied));
        }
        Ok(report)
    }
}

impl std::fmt::Debug for SchemaProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaProvisioner")
            .field("policy", &self.policy)
            .field("migrations", &self.migrations.len())
            .finish_non_exhaustive()
    }
}
