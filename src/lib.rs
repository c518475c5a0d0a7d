pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod paystack;
pub mod policy;
pub mod ports;
pub mod provisioning;
pub mod services;
pub mod utils;

use axum::{
    http::Method,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{AllowedIps, Config};
use crate::middleware::idempotency::{idempotency_middleware, IdempotencyService};
use crate::middleware::ip_filter::IpFilterLayer;
use crate::middleware::request_logger::request_logger_middleware;
use crate::ports::{PaymentGateway, Provisioner, Store};
use crate::services::{OrderSyncService, RetryPolicy, SettlementService, WebhookService};

/// Settings the services need, separated from `Config` so tests can build
/// them without an environment.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub paystack_secret_key: String,
    pub agent_registration_fee: BigDecimal,
    pub retry: RetryPolicy,
    pub webhook_allowed_ips: AllowedIps,
    pub trusted_proxy_depth: usize,
}

impl AppSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            paystack_secret_key: config.paystack_secret_key.clone(),
            agent_registration_fee: config.agent_registration_fee.clone(),
            retry: RetryPolicy::new(config.status_sync_max_attempts, config.status_sync_base_delay),
            webhook_allowed_ips: config.webhook_allowed_ips.clone(),
            trusted_proxy_depth: config.trusted_proxy_depth,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub provisioner: Arc<dyn Provisioner>,
    pub settlement: Arc<SettlementService>,
    pub webhooks: Arc<WebhookService>,
    pub order_sync: Arc<OrderSyncService>,
    pub idempotency: Option<IdempotencyService>,
    pub webhook_allowed_ips: AllowedIps,
    pub trusted_proxy_depth: usize,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        provisioner: Arc<dyn Provisioner>,
        settings: AppSettings,
    ) -> Self {
        let settlement = SettlementService::new(
            store.clone(),
            gateway.clone(),
            provisioner.clone(),
            settings.agent_registration_fee.clone(),
        );
        let webhooks = WebhookService::new(
            store.clone(),
            provisioner.clone(),
            settings.paystack_secret_key,
            settings.agent_registration_fee,
        );
        let order_sync = OrderSyncService::new(store.clone(), provisioner.clone(), settings.retry);

        Self {
            store,
            gateway,
            provisioner,
            settlement: Arc::new(settlement),
            webhooks: Arc::new(webhooks),
            order_sync: Arc::new(order_sync),
            idempotency: None,
            webhook_allowed_ips: settings.webhook_allowed_ips,
            trusted_proxy_depth: settings.trusted_proxy_depth,
        }
    }

    pub fn with_idempotency(mut self, service: IdempotencyService) -> Self {
        self.idempotency = Some(service);
        self
    }
}

pub fn create_app(state: AppState) -> Router {
    let idempotent = Router::new()
        .route("/orders/buy", post(handlers::orders::buy))
        .route("/payments/initialize", post(handlers::payments::initialize))
        .route("/payments/agent-purchase", post(handlers::payments::agent_purchase))
        .route("/withdrawals", post(handlers::withdrawals::request))
        .route_layer(from_fn_with_state(state.clone(), idempotency_middleware));

    let webhook = Router::new()
        .route("/payments/verify", post(handlers::payments::verify))
        .route_layer(IpFilterLayer::new(
            state.webhook_allowed_ips.clone(),
            state.trusted_proxy_depth,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/orders/me", get(handlers::orders::my_orders))
        .route("/orders/sync", post(handlers::orders::sync))
        .route("/withdrawals/:id/resolve", post(handlers::withdrawals::resolve))
        .merge(idempotent)
        .merge(webhook)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(from_fn(request_logger_middleware))
        .with_state(state)
}
