use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::adapters::PgStore;
use crate::config::{mask_password, mask_secret, AllowedIps, Config};
use crate::provisioning::ProvisioningClient;
use crate::services::{OrderSyncService, RetryPolicy};

#[derive(Parser)]
#[command(name = "bundle-core")]
#[command(about = "Bundle Core - data bundle settlement and fulfilment service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Order management commands
    #[command(subcommand)]
    Orders(OrderCommands),

    /// Validate and print the configuration
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum OrderCommands {
    /// Reconcile pending orders with the provisioning API
    Sync {
        /// Maximum number of pending orders to check
        #[arg(short, long, default_value_t = 100)]
        limit: i64,
    },
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;
    tracing::info!("running database migrations");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_orders_sync(config: &Config, limit: i64) -> anyhow::Result<()> {
    if limit < 1 {
        anyhow::bail!("--limit must be at least 1");
    }
    let pool = crate::db::create_pool(config).await?;
    let provisioner = ProvisioningClient::new(
        config.provisioning_base_url.clone(),
        config.provisioning_api_key.clone(),
        config.http_timeout,
    );
    let service = OrderSyncService::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(provisioner),
        RetryPolicy::new(config.status_sync_max_attempts, config.status_sync_base_delay),
    );

    let report = service.sync_order_statuses(limit).await?;
    println!(
        "✓ Checked {} order(s): {} delivered, {} failed, {} still pending",
        report.checked, report.delivered, report.failed, report.still_pending
    );
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Database Max Connections: {}", config.database_max_connections);
    println!("  Paystack URL: {}", config.paystack_base_url);
    println!("  Paystack Secret Key: {}", mask_secret(&config.paystack_secret_key));
    println!("  Provisioning URL: {}", config.provisioning_base_url);
    println!("  Provisioning API Key: {}", mask_secret(&config.provisioning_api_key));
    println!("  Agent Registration Fee: {}", config.agent_registration_fee);
    match &config.webhook_allowed_ips {
        AllowedIps::Any => println!("  Webhook Allowed IPs: * (any)"),
        AllowedIps::Cidrs(cidrs) => {
            let list: Vec<String> = cidrs.iter().map(ToString::to_string).collect();
            println!("  Webhook Allowed IPs: {}", list.join(", "));
        }
    }
    println!("  Trusted Proxy Depth: {}", config.trusted_proxy_depth);
    println!(
        "  Redis URL: {}",
        config
            .redis_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(disabled)".to_string())
    );
    println!(
        "  Status Sync: {} attempt(s), base delay {:?}",
        config.status_sync_max_attempts, config.status_sync_base_delay
    );
    println!("  HTTP Timeout: {:?}", config.http_timeout);

    tracing::info!("configuration is valid");
    println!("✓ Configuration is valid");
    Ok(())
}
