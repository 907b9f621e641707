use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod config;
mod db;
mod error;
mod metrics;
mod models;
mod services;
mod store;
mod utils;

use crate::config::{AppConfig, LogFormat, StorageBackend};
use crate::db::Database;
use crate::services::{EarningsService, FraudService, PayoutService, ReferralService, ReportingService};
use crate::store::{LedgerStore, MemoryLedgerStore, PgLedgerStore};

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn LedgerStore>,
    pub earnings: Arc<EarningsService>,
    pub referrals: Arc<ReferralService>,
    pub payouts: Arc<PayoutService>,
    pub fraud: Arc<FraudService>,
    pub reporting: Arc<ReportingService>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn LedgerStore>, metrics_handle: Option<PrometheusHandle>) -> Self {
        let earnings = Arc::new(EarningsService::new(store.clone()));
        let referrals = Arc::new(ReferralService::new(
            store.clone(),
            earnings.clone(),
            config.referral_hold_days,
        ));
        let payouts = Arc::new(PayoutService::new(store.clone(), config.payout_minimum()));
        let fraud = Arc::new(FraudService::new(store.clone()));
        let reporting = Arc::new(ReportingService::new(store.clone()));

        Self {
            config,
            store,
            earnings,
            referrals,
            payouts,
            fraud,
            reporting,
            metrics_handle,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "inner_bloom_ledger=debug,tower_http=debug".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    tracing::info!("Starting Inner Bloom Ledger v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);
    if config.is_auth_disabled() {
        if config.is_production() {
            anyhow::bail!("auth_disabled is not allowed in production");
        }
        tracing::warn!("Admin authentication is DISABLED");
    }

    let metrics_handle = if config.metrics_enabled {
        let handle = metrics::init_metrics()?;
        tracing::info!("Prometheus metrics exposed at /metrics");
        Some(handle)
    } else {
        None
    };

    // Initialize storage
    let store: Arc<dyn LedgerStore> = match config.storage {
        StorageBackend::Postgres => {
            let db = Database::connect(&config.database_url, config.db_max_connections).await?;
            tracing::info!("Database connected, migrations applied");
            Arc::new(PgLedgerStore::new(db.pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store; nothing is persisted");
            Arc::new(MemoryLedgerStore::with_default_programs().await?)
        }
    };

    let state = Arc::new(AppState::new(config.clone(), store, metrics_handle));
    tracing::info!(
        "Services initialized (payout minimum {}, refund hold {} days)",
        state.payouts.minimum_payout(),
        config.referral_hold_days
    );

    if config.payout_sweep_interval_secs > 0 {
        state.payouts.clone().start_sweep_loop(config.payout_sweep_interval_secs);
    } else {
        tracing::info!("Background payout sweep disabled");
    }

    let app = build_app(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .nest("/api", api::routes::create_router(state.clone()))
        .layer(axum_middleware::from_fn(api::middleware::metrics_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
