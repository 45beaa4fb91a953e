//! Cameyo server binary.
//!
//! ```bash
//! # Serve with PostgreSQL, creating tenant schemas on first use
//! DATABASE_URL=postgres://app@localhost/cameyo cameyo-server serve --provision-policy auto-provision
//!
//! # Serve without a database (in-memory storage, `public` only unless auto-provisioning)
//! cameyo-server serve --port 3000
//!
//! # Create schemas and apply migrations ahead of time
//! cameyo-server provision --database-url postgres://app@localhost/cameyo acme globex
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use cameyo_core::{MigrationSet, TenantId};
use cameyo_server::network::{NetworkConfig, NetworkModule, TlsConfig};
use cameyo_server::storage::MemoryBackend;
use cameyo_server::tenant::{
    ProvisionPolicy, SchemaProvisioner, TenantClientRegistry, TenantConfig, DEFAULT_TENANT_HEADER,
};
use cameyo_server::traits::{ClientConnector, SchemaCatalog};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "cameyo-server", version, about = "Tenant-scoped data access server")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve(ServeArgs),
    /// Create tenant schemas and apply pending migrations.
    Provision(ProvisionArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// PostgreSQL connection string. Without it, storage is in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// What to do when a tenant's schema does not exist.
    #[arg(long, env = "TENANT_PROVISION_POLICY", value_enum, default_value_t = ProvisionPolicy::FailClosed)]
    provision_policy: ProvisionPolicy,

    /// Header carrying an explicit tenant id.
    #[arg(long, env = "TENANT_HEADER", default_value = DEFAULT_TENANT_HEADER)]
    tenant_header: String,

    /// Disconnect tenant clients idle this many seconds. Unset: never.
    #[arg(long, env = "TENANT_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: Option<u64>,

    #[arg(long, env = "TENANT_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    sweep_interval_secs: u64,

    /// Comma-separated allowed origins, or `*`.
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long, env = "TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ProvisionArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Leave the `public` schema alone.
    #[arg(long)]
    skip_public: bool,

    /// Tenants to provision after `public`, in order.
    #[arg(value_parser = TenantId::from_str)]
    tenants: Vec<TenantId>,
}

impl ServeArgs {
    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls: self
                .tls_cert
                .clone()
                .zip(self.tls_key.clone())
                .map(|(cert_path, key_path)| TlsConfig {
                    cert_path,
                    key_path,
                }),
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..NetworkConfig::default()
        }
    }

    fn tenant_config(&self) -> TenantConfig {
        TenantConfig {
            header_name: self.tenant_header.clone(),
            policy: self.provision_policy,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
        return;
    }
    info!("Shutdown signal received");
}

async fn run<C: ClientConnector>(
    args: &ServeArgs,
    connector: Arc<C>,
    catalog: Arc<dyn SchemaCatalog>,
) -> anyhow::Result<()> {
    let tenant_config = args.tenant_config();
    let provisioner = SchemaProvisioner::new(
        catalog,
        tenant_config.policy,
        Arc::new(MigrationSet::marketplace()),
    );
    let registry = TenantClientRegistry::new(connector, Arc::new(provisioner));

    let mut module = NetworkModule::new(args.network_config(), tenant_config, registry)?;
    let port = module.start().await?;
    info!(port, policy = ?args.provision_policy, "Cameyo server listening");

    module.serve(shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    match args.database_url.clone() {
        Some(url) => serve_postgres(&args, url).await,
        None => {
            warn!("DATABASE_URL not set; using in-memory storage");
            let backend = Arc::new(MemoryBackend::new());
            let catalog: Arc<dyn SchemaCatalog> = backend.clone();
            run(&args, backend, catalog).await
        }
    }
}

#[cfg(feature = "postgres")]
async fn connect_postgres(url: String) -> anyhow::Result<Arc<cameyo_server::storage::PgBackend>> {
    use cameyo_server::storage::{ConnectionTemplate, PgBackend, PoolSettings};

    let backend = PgBackend::connect(ConnectionTemplate::new(url), PoolSettings::default()).await?;
    Ok(Arc::new(backend))
}

#[cfg(feature = "postgres")]
async fn serve_postgres(args: &ServeArgs, url: String) -> anyhow::Result<()> {
    let backend = connect_postgres(url).await?;
    let catalog: Arc<dyn SchemaCatalog> = backend.clone();
    let result = run(args, Arc::clone(&backend), catalog).await;
    backend.close().await;
    result
}

#[cfg(not(feature = "postgres"))]
async fn serve_postgres(_args: &ServeArgs, _url: String) -> anyhow::Result<()> {
    bail!("DATABASE_URL is set but this build has no `postgres` feature")
}

#[cfg(feature = "postgres")]
async fn provision(args: ProvisionArgs) -> anyhow::Result<()> {
    let backend = connect_postgres(args.database_url).await?;
    let catalog: Arc<dyn SchemaCatalog> = backend.clone();
    let provisioner = SchemaProvisioner::new(
        catalog,
        ProvisionPolicy::AutoProvision,
        Arc::new(MigrationSet::marketplace()),
    );

    let mut targets = Vec::with_capacity(args.tenants.len() + 1);
    if !args.skip_public {
        targets.push(TenantId::public());
    }
    targets.extend(args.tenants);
    if targets.is_empty() {
        bail!("nothing to provision");
    }

    let result = provisioner.provision_all(&targets).await;
    backend.close().await;
    let report = result.context("provisioning stopped")?;
    for (tenant, applied) in report {
        info!(tenant = %tenant, applied = applied.len(), "Schema up to date");
    }
    Ok(())
}

#[cfg(not(feature = "postgres"))]
async fn provision(_args: ProvisionArgs) -> anyhow::Result<()> {
    bail!("provisioning requires the `postgres` feature")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Provision(args) => provision(args).await,
    }
}
