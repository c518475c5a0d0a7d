use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bundle_core::adapters::PgStore;
use bundle_core::cli::{self, Cli, Commands, DbCommands, OrderCommands};
use bundle_core::config::Config;
use bundle_core::middleware::idempotency::IdempotencyService;
use bundle_core::paystack::PaystackClient;
use bundle_core::provisioning::ProvisioningClient;
use bundle_core::{create_app, db, AppSettings, AppState};

const SYNC_INTERVAL: Duration = Duration::from_secs(60);
const SYNC_BATCH: i64 = 50;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_json);

    match Cli::parse().command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Orders(OrderCommands::Sync { limit })) => {
            cli::handle_orders_sync(&config, limit).await
        }
        Some(Commands::Config) => cli::handle_config_validate(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let gateway = PaystackClient::new(
        config.paystack_base_url.clone(),
        config.paystack_secret_key.clone(),
        config.http_timeout,
    );
    let provisioner = ProvisioningClient::new(
        config.provisioning_base_url.clone(),
        config.provisioning_api_key.clone(),
        config.http_timeout,
    );

    let mut state = AppState::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(gateway),
        Arc::new(provisioner),
        AppSettings::from_config(&config),
    );
    match config.redis_url.as_deref() {
        Some(url) => {
            state = state.with_idempotency(IdempotencyService::new(url)?);
            tracing::info!("idempotency keys enabled");
        }
        None => tracing::info!("REDIS_URL not set; idempotency keys disabled"),
    }

    tokio::spawn(state.order_sync.clone().run(SYNC_INTERVAL, SYNC_BATCH));

    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!(%addr, "listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
