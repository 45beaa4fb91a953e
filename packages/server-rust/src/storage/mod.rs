//! Storage backends for tenant-scoped clients.
//!
//! - [`memory`]: in-memory schemas, for tests and database-less development
//! - [`postgres`] (feature `postgres`): schema-per-tenant `PostgreSQL` via `sqlx`
//!
//! Both implement [`SchemaCatalog`](crate::traits::SchemaCatalog) and
//! [`ClientConnector`](crate::traits::ClientConnector).

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::fmt;

use cameyo_core::TenantId;

pub use memory::{MemoryBackend, MemoryClient};
#[cfg(feature = "postgres")]
pub use postgres::{PgBackend, PgClient, PoolSettings};

/// Base connection string plus a per-tenant namespace parameter.
///
/// The namespace is appended as a `libpq` `options` parameter setting
/// `search_path`, joined with `?` or `&` depending on whether the base already
/// carries a query string. Tenant ids never need percent-encoding because of
/// their restricted charset.
#[derive(Clone)]
pub struct ConnectionTemplate {
    base: String,
}

impl ConnectionTemplate {
    /// Wraps a base connection string such as `postgres://user:pw@host/db`.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// The unparameterized connection string (targets the default schema).
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Connection string scoped to `tenant`'s schema.
    #[must_use]
    pub fn target_for(&self, tenant: &TenantId) -> String {
        let separator = if self.base.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}options=-c%20search_path%3D{tenant}",
            self.base
        )
    }
}

// Connection strings carry credentials; keep them out of logs.
impl fmt::Debug for ConnectionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTemplate").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_with_question_mark_when_no_query() {
        let template = ConnectionTemplate::new("postgres://app@db:5432/cameyo");
        let acme = TenantId::parse("acme").unwrap();
        assert_eq!(
            template.target_for(&acme),
            "postgres://app@db:5432/cameyo?options=-c%20search_path%3Dacme"
        );
    }

    #[test]
    fn appends_with_ampersand_when_query_present() {
        let template = ConnectionTemplate::new("postgres://app@db/cameyo?sslmode=require");
        let target = template.target_for(&TenantId::public());
        assert_eq!(
            target,
            "postgres://app@db/cameyo?sslmode=require&options=-c%20search_path%3Dpublic"
        );
    }

    #[test]
    fn debug_does_not_leak_credentials() {
        let template = ConnectionTemplate::new("postgres://app:hunter2@db/cameyo");
        assert!(!format!("{template:?}").contains("hunter2"));
    }
}
