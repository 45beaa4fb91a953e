//! Cameyo Server: tenant-scoped data access over axum, with request-to-tenant
//! resolution, schema provisioning, and a per-tenant storage client registry.

pub mod network;
pub mod storage;
pub mod tenant;
pub mod traits;

pub use network::{ApiError, AppState, NetworkConfig, NetworkModule};
pub use tenant::{
    CurrentTenant, ProvisionPolicy, SchemaProvisioner, TenantClient, TenantClientRegistry,
    TenantConfig, TenantContext, TenantResolver,
};
pub use traits::{ClientConnector, SchemaCatalog, StorageClient};
