//! Cameyo Core: tenant identifiers, tenant error taxonomy, and the schema migration set.

pub mod error;
pub mod migration;
pub mod tenant_id;

pub use error::TenantError;
pub use migration::{Migration, MigrationOrderError, MigrationSet};
pub use tenant_id::{validate, TenantId, MAX_TENANT_ID_LEN, PUBLIC_TENANT};
