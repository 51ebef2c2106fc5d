use boxoffice_core::inventory::SeatInventoryGateway;
use boxoffice_core::repository::ReservationStore;
use boxoffice_core::{CoreError, CoreResult};
use boxoffice_shared::models::events::{ReservationExpiringEvent, ReservationReleasedEvent};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coordinator::finish;
use crate::models::SweepReport;
use crate::notifier::ReservationNotifier;

#[derive(Debug, Clone)]
pub struct SweeperSettings {
    pub expiry_interval: Duration,
    pub notice_interval: Duration,
    /// How long before expiry a reservation counts as "about to expire".
    pub notice_window: Duration,
    pub call_timeout: Duration,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            expiry_interval: Duration::from_secs(20),
            notice_interval: Duration::from_secs(25),
            notice_window: Duration::from_secs(60),
            call_timeout: Duration::from_secs(10),
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

// ============================================================================
// HoldExpirySweeper
// ============================================================================

/// Releases unpaid reservations whose hold has run out: inventory first,
/// then the local rows.
pub struct HoldExpirySweeper {
    store: Arc<dyn ReservationStore>,
    inventory: Arc<dyn SeatInventoryGateway>,
    notifier: Arc<dyn ReservationNotifier>,
    settings: SweeperSettings,
}

impl HoldExpirySweeper {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        inventory: Arc<dyn SeatInventoryGateway>,
        notifier: Arc<dyn ReservationNotifier>,
        settings: SweeperSettings,
    ) -> Self {
        Self {
            store,
            inventory,
            notifier,
            settings,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.settings.expiry_interval.as_secs(), "Hold expiry sweeper started");
        let mut interval = ticker(self.settings.expiry_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.sweep_once(Utc::now()).await {
                Ok(report) if report.scanned > 0 => info!(
                    scanned = report.scanned,
                    released = report.released,
                    skipped = report.skipped,
                    "Hold expiry sweep finished"
                ),
                Ok(_) => debug!("Hold expiry sweep found nothing"),
                Err(e) => warn!(error = %e, "Hold expiry sweep failed"),
            }
        }
        info!("Hold expiry sweeper stopped");
    }

    /// One cycle. A reservation whose inventory cannot be freed stays for the
    /// next cycle.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> CoreResult<SweepReport> {
        let expired = self.store.find_expired_unpaid(now).await?;
        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };

        for reservation in expired {
            match self.release(reservation.id, now).await {
                Ok(Some(event)) => {
                    report.released += 1;
                    self.notifier.reservation_released(event).await;
                }
                Ok(None) => debug!(reservation_id = %reservation.id, "Reservation settled before release"),
                Err(e) => {
                    report.skipped += 1;
                    warn!(reservation_id = %reservation.id, error = %e, "Release failed, retrying next cycle");
                }
            }
        }
        Ok(report)
    }

    async fn release(&self, reservation_id: Uuid, now: DateTime<Utc>) -> CoreResult<Option<ReservationReleasedEvent>> {
        let mut uow = self.store.begin().await?;
        let result = async {
            // Re-check under the row lock: a confirmation may have won the race.
            let Some(reservation) = uow.lock_reservation(reservation_id).await? else {
                return Ok(None);
            };
            if reservation.paid || !reservation.is_expired(now) {
                return Ok(None);
            }

            let keys = reservation.inventory_keys();
            let free = self
                .inventory
                .free(&reservation.event_key, &reservation.workspace_key, &keys);
            match tokio::time::timeout(self.settings.call_timeout, free).await {
                Ok(result) => result?,
                Err(_) => return Err(CoreError::ExternalService("seat inventory free timed out".to_string())),
            }

            uow.delete_reservation(reservation.id).await?;
            Ok::<_, CoreError>(Some(ReservationReleasedEvent {
                reservation_id: reservation.id,
                event_id: reservation.event_id,
                object_keys: keys,
                released_at: now,
            }))
        }
        .await;
        finish(uow, result).await
    }
}

// ============================================================================
// ExpiryNoticeSweeper
// ============================================================================

/// Warns buyers shortly before their hold runs out. Each reservation is
/// announced once while it stays inside the window.
pub struct ExpiryNoticeSweeper {
    store: Arc<dyn ReservationStore>,
    notifier: Arc<dyn ReservationNotifier>,
    settings: SweeperSettings,
    notified: HashSet<Uuid>,
}

impl ExpiryNoticeSweeper {
    pub fn new(store: Arc<dyn ReservationStore>, notifier: Arc<dyn ReservationNotifier>, settings: SweeperSettings) -> Self {
        Self {
            store,
            notifier,
            settings,
            notified: HashSet::new(),
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(interval_secs = self.settings.notice_interval.as_secs(), "Expiry notice sweeper started");
        let mut interval = ticker(self.settings.notice_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            match self.sweep_once(Utc::now()).await {
                Ok(0) => {}
                Ok(sent) => info!(sent, "Expiry notices published"),
                Err(e) => warn!(error = %e, "Expiry notice sweep failed"),
            }
        }
        info!("Expiry notice sweeper stopped");
    }

    /// Returns the number of notices published.
    pub async fn sweep_once(&mut self, now: DateTime<Utc>) -> CoreResult<usize> {
        let window = chrono::Duration::from_std(self.settings.notice_window)
            .map_err(|e| CoreError::Validation(format!("notice window out of range: {}", e)))?;
        let expiring = self.store.find_expiring(now, now + window).await?;

        let in_window: HashSet<Uuid> = expiring.iter().map(|r| r.id).collect();
        self.notified.retain(|id| in_window.contains(id));

        let mut sent = 0;
        for reservation in expiring {
            let Some(expires_at) = reservation.expires_at() else {
                continue;
            };
            if !self.notified.insert(reservation.id) {
                continue;
            }
            let event = ReservationExpiringEvent::new(reservation.id, reservation.event_id, reservation.user_id, expires_at, now);
            self.notifier.reservation_expiring(event).await;
            sent += 1;
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InMemorySeatInventory, InventoryCall, InventoryOperation};
    use async_trait::async_trait;
    use boxoffice_core::inventory::STATUS_FREE;
    use boxoffice_core::models::{Category, EventConfig, HoldInfo, LineItem, ObjectType, Reservation};
    use boxoffice_store::InMemoryReservationStore;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        expiring: Mutex<Vec<ReservationExpiringEvent>>,
        released: Mutex<Vec<ReservationReleasedEvent>>,
    }

    #[async_trait]
    impl ReservationNotifier for RecordingNotifier {
        async fn reservation_expiring(&self, event: ReservationExpiringEvent) {
            self.expiring.lock().unwrap().push(event);
        }

        async fn reservation_released(&self, event: ReservationReleasedEvent) {
            self.released.lock().unwrap().push(event);
        }
    }

    fn event() -> (EventConfig, Category) {
        let category = Category { id: Uuid::new_v4(), name: "VIP".into(), price: 10 };
        let event = EventConfig {
            id: Uuid::new_v4(),
            name: "Concert".into(),
            event_key: "evt".into(),
            workspace_key: "ws".into(),
            categories: vec![category.clone()],
        };
        (event, category)
    }

    /// Store a held reservation created `age` ago, holding its seats in `inventory`.
    async fn held_reservation(
        store: &InMemoryReservationStore,
        inventory: &InMemorySeatInventory,
        seats: &[&str],
        age: chrono::Duration,
    ) -> Reservation {
        let (event, category) = event();
        let mut reservation = Reservation::new(&event, None, "Ali".into(), "0770".into(), 0);
        for seat in seats {
            inventory.add_seat("evt", seat, &category.id.to_string());
            reservation.add_line_item(LineItem::new(reservation.id, *seat, *seat, &category, ObjectType::Seat));
        }
        let keys: Vec<String> = seats.iter().map(|s| s.to_string()).collect();
        let grant = inventory.hold("evt", "ws", 15, &keys).await.unwrap();
        reservation.attach_hold(HoldInfo::new(grant.hold_token, 15), &HashMap::new());
        reservation.created_at = Utc::now() - age;

        let mut uow = store.begin().await.unwrap();
        uow.insert_reservation(&reservation).await.unwrap();
        uow.commit().await.unwrap();
        reservation
    }

    fn expiry_sweeper(
        store: &InMemoryReservationStore,
        inventory: Arc<InMemorySeatInventory>,
        notifier: Arc<RecordingNotifier>,
    ) -> HoldExpirySweeper {
        HoldExpirySweeper::new(Arc::new(store.clone()), inventory, notifier, SweeperSettings::default())
    }

    #[tokio::test]
    async fn test_expired_reservation_is_freed_then_deleted() {
        let store = InMemoryReservationStore::new();
        let inventory = Arc::new(InMemorySeatInventory::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let expired = held_reservation(&store, &inventory, &["S1", "S2"], chrono::Duration::minutes(16)).await;
        held_reservation(&store, &inventory, &["S3"], chrono::Duration::minutes(5)).await;

        let sweeper = expiry_sweeper(&store, inventory.clone(), notifier.clone());
        let report = sweeper.sweep_once(Utc::now()).await.unwrap();

        assert_eq!(report, SweepReport { scanned: 1, released: 1, skipped: 0 });
        assert!(store.get_reservation(expired.id).await.unwrap().is_none());
        assert_eq!(store.reservation_count().await, 1);
        assert_eq!(inventory.status_of("evt", "S1").as_deref(), Some(STATUS_FREE));
        assert!(inventory.calls().contains(&InventoryCall::Free {
            event_key: "evt".into(),
            object_keys: vec!["S1".into(), "S2".into()],
        }));
        assert_eq!(notifier.released.lock().unwrap()[0].reservation_id, expired.id);
    }

    #[tokio::test]
    async fn test_free_failure_keeps_row_for_next_cycle() {
        let store = InMemoryReservationStore::new();
        let inventory = Arc::new(InMemorySeatInventory::new());
        let expired = held_reservation(&store, &inventory, &["S1"], chrono::Duration::minutes(16)).await;
        let sweeper = expiry_sweeper(&store, inventory.clone(), Arc::new(RecordingNotifier::default()));

        inventory.set_failing(InventoryOperation::Free, true);
        let report = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(store.get_reservation(expired.id).await.unwrap().is_some());

        inventory.set_failing(InventoryOperation::Free, false);
        let report = sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.released, 1);
        assert!(store.get_reservation(expired.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_paid_reservation_is_never_swept() {
        let store = InMemoryReservationStore::new();
        let inventory = Arc::new(InMemorySeatInventory::new());
        let mut paid = held_reservation(&store, &inventory, &["S1"], chrono::Duration::minutes(30)).await;
        paid.mark_paid();
        let mut uow = store.begin().await.unwrap();
        uow.update_reservation(&paid).await.unwrap();
        uow.commit().await.unwrap();

        let sweeper = expiry_sweeper(&store, inventory.clone(), Arc::new(RecordingNotifier::default()));
        let report = sweeper.sweep_once(Utc::now()).await.unwrap();

        assert_eq!(report.scanned, 0);
        assert!(store.get_reservation(paid.id).await.unwrap().is_some());
        assert!(!inventory.calls().iter().any(|c| matches!(c, InventoryCall::Free { .. })));
    }

    #[tokio::test]
    async fn test_expiry_notice_sent_once_per_reservation() {
        let store = InMemoryReservationStore::new();
        let inventory = InMemorySeatInventory::new();
        let notifier = Arc::new(RecordingNotifier::default());
        // 15-minute hold created 14m30s ago: 30 seconds left.
        let soon = held_reservation(&store, &inventory, &["S1"], chrono::Duration::seconds(14 * 60 + 30)).await;
        held_reservation(&store, &inventory, &["S2"], chrono::Duration::minutes(1)).await;

        let mut sweeper = ExpiryNoticeSweeper::new(Arc::new(store.clone()), notifier.clone(), SweeperSettings::default());
        let now = Utc::now();
        assert_eq!(sweeper.sweep_once(now).await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once(now).await.unwrap(), 0);

        let sent = notifier.expiring.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].reservation_id, soon.id);
        assert!(sent[0].seconds_left > 0 && sent[0].seconds_left <= 30);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = InMemoryReservationStore::new();
        let sweeper = HoldExpirySweeper::new(
            Arc::new(store),
            Arc::new(InMemorySeatInventory::new()),
            Arc::new(RecordingNotifier::default()),
            SweeperSettings {
                expiry_interval: Duration::from_millis(10),
                ..SweeperSettings::default()
            },
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
