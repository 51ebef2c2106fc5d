use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Published by the near-expiry sweeper while a pending reservation is inside
/// the warning window.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct ReservationExpiringEvent {
    pub reservation_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub seconds_left: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ReservationReleasedEvent {
    pub reservation_id: Uuid,
    pub event_id: Uuid,
    pub object_keys: Vec<String>,
    pub released_at: DateTime<Utc>,
}

impl ReservationExpiringEvent {
    pub fn new(reservation_id: Uuid, event_id: Uuid, user_id: Option<Uuid>, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            reservation_id,
            event_id,
            user_id,
            expires_at,
            seconds_left: (expires_at - now).num_seconds().max(0),
        }
    }

    /// Whether the notice is addressed to the given user.
    pub fn is_for(&self, user_id: Uuid) -> bool {
        self.user_id == Some(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_seconds_left_is_clamped() {
        let now = Utc::now();
        let event = ReservationExpiringEvent::new(Uuid::new_v4(), Uuid::new_v4(), None, now - Duration::seconds(5), now);
        assert_eq!(event.seconds_left, 0);

        let event = ReservationExpiringEvent::new(Uuid::new_v4(), Uuid::new_v4(), None, now + Duration::seconds(42), now);
        assert_eq!(event.seconds_left, 42);
    }

    #[test]
    fn test_is_for_user() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let event = ReservationExpiringEvent::new(Uuid::new_v4(), Uuid::new_v4(), Some(user), now, now);
        assert!(event.is_for(user));
        assert!(!event.is_for(Uuid::new_v4()));
    }
}
