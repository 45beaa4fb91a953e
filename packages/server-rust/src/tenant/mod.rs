//! Tenant routing: resolution, request scope, schema provisioning, and the
//! per-tenant client registry.

pub mod config;
pub mod context;
pub mod extract;
pub mod provisioner;
pub mod registry;
pub mod resolver;
pub mod sweeper;

pub use config::{ProvisionPolicy, TenantConfig, DEFAULT_TENANT_HEADER};
pub use context::TenantContext;
pub use extract::{CurrentTenant, TenantClient};
pub use provisioner::SchemaProvisioner;
pub use registry::TenantClientRegistry;
pub use resolver::{ResolvedTenant, TenantResolver, TenantSource};
pub use sweeper::IdleSweeper;
