//! EHR tenant administration.
//!
//! Provisions and deprovisions tenant schemas outside the request path.

mod cli;

use clap::Parser;
use ehr_persistence::backends::postgres::TenantPool;
use ehr_persistence::core::SchemaLifecycle;
use tracing::info;

use crate::cli::{Cli, Command};

/// Installs the `tracing` subscriber. `RUST_LOG` overrides `level`.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("tenantctl={level},ehr_persistence={level}"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    // Refuse before connecting to anything.
    if let Command::Deprovision { tenant, yes: false } = &cli.command {
        anyhow::bail!(
            "refusing to drop all data of tenant {} without --yes",
            tenant
        );
    }

    let config = cli.postgres_config()?;
    info!(host = %config.host, dbname = %config.dbname, "Connecting");
    let pool = TenantPool::new(config).await?;

    let result = run(&pool, cli.command).await;
    pool.close();
    result
}

async fn run(pool: &TenantPool, command: Command) -> anyhow::Result<()> {
    match command {
        Command::InitShared => {
            pool.init_shared_schema().await?;
            println!("shared schema {} ready", pool.strategy().shared_schema());
        }
        Command::Provision { tenant } => {
            let outcome = pool.provision_tenant(&tenant).await?;
            println!("{}: {} ({})", tenant, outcome, pool.schema_for(&tenant));
        }
        Command::Deprovision { tenant, .. } => {
            pool.deprovision_tenant(&tenant).await?;
            println!("{}: deprovisioned", tenant);
        }
        Command::List => {
            for tenant in pool.list_tenants().await? {
                println!("{}\t{}", tenant, pool.schema_for(&tenant));
            }
        }
        Command::Status { tenant } => {
            let schema = pool.schema_for(&tenant);
            match pool.schema_version(&tenant).await? {
                Some(version) => println!("{}: provisioned ({}, version {})", tenant, schema, version),
                None => println!("{}: not provisioned ({})", tenant, schema),
            }
        }
        Command::Health => {
            pool.health_check().await?;
            let status = pool.status();
            println!(
                "ok: {} of {} connections open, {} idle",
                status.size, status.max_size, status.available
            );
        }
    }
    Ok(())
}
