use async_trait::async_trait;
use boxoffice_shared::models::events::{ReservationExpiringEvent, ReservationReleasedEvent};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Outbound notices produced by the sweepers.
#[async_trait]
pub trait ReservationNotifier: Send + Sync {
    async fn reservation_expiring(&self, event: ReservationExpiringEvent);

    async fn reservation_released(&self, event: ReservationReleasedEvent);
}

/// Fans "about to expire" notices out to in-process subscribers (the SSE
/// stream). Releases are only logged.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ReservationExpiringEvent>,
}

impl BroadcastNotifier {
    pub fn new(sender: broadcast::Sender<ReservationExpiringEvent>) -> Self {
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReservationExpiringEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ReservationNotifier for BroadcastNotifier {
    async fn reservation_expiring(&self, event: ReservationExpiringEvent) {
        let reservation_id = event.reservation_id;
        // No subscribers is not an error.
        match self.sender.send(event) {
            Ok(receivers) => debug!(%reservation_id, receivers, "Published expiry notice"),
            Err(_) => debug!(%reservation_id, "No listeners for expiry notice"),
        }
    }

    async fn reservation_released(&self, event: ReservationReleasedEvent) {
        info!(
            reservation_id = %event.reservation_id,
            event_id = %event.event_id,
            objects = event.object_keys.len(),
            "Expired reservation released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_subscribers_receive_expiry_notice() {
        let (tx, _) = broadcast::channel(8);
        let notifier = BroadcastNotifier::new(tx);
        let mut rx = notifier.subscribe();

        let now = Utc::now();
        let event = ReservationExpiringEvent::new(Uuid::new_v4(), Uuid::new_v4(), None, now, now);
        notifier.reservation_expiring(event.clone()).await;

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let notifier = BroadcastNotifier::new(tx);
        let now = Utc::now();
        notifier
            .reservation_expiring(ReservationExpiringEvent::new(Uuid::new_v4(), Uuid::new_v4(), None, now, now))
            .await;
    }
}
