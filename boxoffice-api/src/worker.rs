use std::sync::Arc;

use boxoffice_core::inventory::SeatInventoryGateway;
use boxoffice_core::repository::ReservationStore;
use boxoffice_order::{ExpiryNoticeSweeper, HoldExpirySweeper, ReservationNotifier, SweeperSettings};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Starts the hold-expiry and expiry-notice sweepers. Both stop when `shutdown` is cancelled.
pub fn spawn_sweepers(
    store: Arc<dyn ReservationStore>,
    inventory: Arc<dyn SeatInventoryGateway>,
    notifier: Arc<dyn ReservationNotifier>,
    settings: SweeperSettings,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    info!(
        expiry_every = ?settings.expiry_interval,
        notice_every = ?settings.notice_interval,
        "Starting reservation sweepers"
    );

    let expiry = HoldExpirySweeper::new(store.clone(), inventory, notifier.clone(), settings.clone());
    let notice = ExpiryNoticeSweeper::new(store, notifier, settings);

    vec![
        tokio::spawn(expiry.run(shutdown.clone())),
        tokio::spawn(notice.run(shutdown)),
    ]
}
