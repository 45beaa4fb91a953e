//! Tenant routing configuration.

use std::time::Duration;

/// Default request header carrying an explicit tenant id.
pub const DEFAULT_TENANT_HEADER: &str = "x-tenant-id";

/// What [`SchemaProvisioner::ensure_schema`](super::SchemaProvisioner::ensure_schema)
/// does when a tenant's schema is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ProvisionPolicy {
    /// Reject the tenant with `SchemaNotProvisioned`. Schemas are created
    /// only by the administrative `provision` operation.
    #[default]
    FailClosed,
    /// Create the schema and apply migrations on first use.
    AutoProvision,
}

/// Tenant resolution and client lifecycle settings.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    /// Request header checked before the host subdomain. Case-insensitive.
    pub header_name: String,
    /// Behaviour for tenants whose schema does not exist yet.
    pub policy: ProvisionPolicy,
    /// Disconnect clients unused for this long. `None` keeps them until shutdown.
    pub idle_timeout: Option<Duration>,
    /// How often the idle sweeper runs when `idle_timeout` is set.
    pub sweep_interval: Duration,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            header_name: DEFAULT_TENANT_HEADER.to_string(),
            policy: ProvisionPolicy::FailClosed,
            idle_timeout: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_config_defaults() {
        let config = TenantConfig::default();
        assert_eq!(config.header_name, "x-tenant-id");
        assert_eq!(config.policy, ProvisionPolicy::FailClosed);
        assert!(config.idle_timeout.is_none());
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn policy_parses_from_cli_value() {
        use clap::ValueEnum;
        assert_eq!(
            ProvisionPolicy::from_str("auto-provision", true),
            Ok(ProvisionPolicy::AutoProvision)
        );
        assert_eq!(
            ProvisionPolicy::from_str("fail-closed", true),
            Ok(ProvisionPolicy::FailClosed)
        );
    }
}
