use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use boxoffice_api::{
    app,
    state::{AppState, AuthConfig, RateLimit},
    worker::spawn_sweepers,
};
use boxoffice_core::models::PaymentProvider;
use boxoffice_order::gateways::{AmwalGateway, AmwalSettings, CashGateway};
use boxoffice_order::{
    BroadcastNotifier, CoordinatorSettings, PaymentGatewayRegistry, ReservationCoordinator, SeatsIoClient,
    SweeperSettings,
};
use boxoffice_store::{app_config::Config, DbClient, PgEventCatalog, PgReservationStore, RedisClient};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice_api=debug,boxoffice_order=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting box office API on port {}", config.server.port);

    // Database
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    // Redis is optional; without it rate limiting is off.
    let rate_limit = match &config.redis {
        Some(redis) => match RedisClient::new(&redis.url).await {
            Ok(client) => Some(RateLimit {
                redis: Arc::new(client),
                per_minute: config.business_rules.rate_limit_per_minute,
            }),
            Err(e) => {
                tracing::warn!("Redis unavailable, rate limiting disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let timeout = config.business_rules.external_call_timeout();

    // Payment providers
    let amwal = Arc::new(
        AmwalGateway::new(AmwalSettings {
            server_key: config.payments.amwal.server_key.clone(),
            profile_id: config.payments.amwal.profile_id,
            base_url: config.payments.amwal.base_url.clone(),
            callback_url: config.payments.amwal.callback_url.clone(),
            return_url: config.payments.amwal.return_url.clone(),
            timeout,
        })
        .context("Failed to build Amwal gateway")?,
    );
    let primary: PaymentProvider = config
        .payments
        .primary_provider
        .parse()
        .context("Invalid payments.primary_provider")?;
    let registry = PaymentGatewayRegistry::new(primary)
        .register(amwal.clone())
        .register(Arc::new(CashGateway::new(config.payments.cash.enabled)));

    // Seat inventory
    let inventory = Arc::new(
        SeatsIoClient::new(&config.seatsio.base_url, &config.seatsio.secret_key, timeout)
            .context("Failed to build seats.io client")?,
    );

    let store = Arc::new(PgReservationStore::new(db.pool.clone()));
    let catalog = Arc::new(PgEventCatalog::new(db.pool.clone()));

    let coordinator = Arc::new(ReservationCoordinator::new(
        store.clone(),
        catalog,
        inventory.clone(),
        Arc::new(registry),
        CoordinatorSettings {
            hold_minutes: config.business_rules.hold_minutes,
            currency: config.payments.currency.clone(),
            confirmation_secret: config.payments.confirmation_secret.clone(),
            call_timeout: timeout,
        },
    ));

    // SSE Broadcast Channel
    let (expiring_tx, _) = tokio::sync::broadcast::channel(100);
    let notifier = Arc::new(BroadcastNotifier::new(expiring_tx.clone()));

    let shutdown = CancellationToken::new();
    let sweepers = spawn_sweepers(
        store,
        inventory,
        notifier,
        SweeperSettings {
            expiry_interval: Duration::from_secs(config.business_rules.expiry_sweep_seconds),
            notice_interval: Duration::from_secs(config.business_rules.expiry_notice_sweep_seconds),
            notice_window: Duration::from_secs(config.business_rules.expiry_notice_window_seconds.max(0) as u64),
            call_timeout: timeout,
        },
        shutdown.clone(),
    );

    let app_state = AppState {
        coordinator,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        amwal,
        expiring_tx,
        rate_limit,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    for handle in sweepers {
        if let Err(e) = handle.await {
            tracing::error!("Sweeper task failed: {}", e);
        }
    }
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
