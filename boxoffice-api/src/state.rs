use std::sync::Arc;
use boxoffice_order::gateways::AmwalGateway;
use boxoffice_order::ReservationCoordinator;
use boxoffice_shared::models::events::ReservationExpiringEvent;
use boxoffice_store::RedisClient;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct RateLimit {
    pub redis: Arc<RedisClient>,
    pub per_minute: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReservationCoordinator>,
    pub auth: AuthConfig,
    /// Verifies the signature of Amwal callbacks.
    pub amwal: Arc<AmwalGateway>,
    pub expiring_tx: broadcast::Sender<ReservationExpiringEvent>,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimit>,
}
