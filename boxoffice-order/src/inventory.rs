use async_trait::async_trait;
use boxoffice_core::inventory::{HoldGrant, InventoryObject, SeatInventoryGateway, STATUS_BOOKED, STATUS_FREE};
use boxoffice_core::models::ObjectType;
use boxoffice_core::{CoreError, CoreResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const STATUS_HELD: &str = "reservedByToken";

/// A call made against the in-memory inventory, recorded for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryCall {
    Hold { event_key: String, object_keys: Vec<String> },
    Book { event_key: String, hold_token: String, object_keys: Vec<String>, order_id: String },
    Free { event_key: String, object_keys: Vec<String> },
    ChangeStatus { event_key: String, object_keys: Vec<String>, status: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryOperation {
    Retrieve,
    Hold,
    Book,
    Free,
    ChangeStatus,
}

#[derive(Debug, Clone)]
struct SeatObject {
    object: InventoryObject,
    hold_token: Option<String>,
}

#[derive(Debug, Default)]
struct InventoryState {
    objects: HashMap<(String, String), SeatObject>,
    calls: Vec<InventoryCall>,
    failing: HashSet<InventoryOperation>,
}

/// Process-local seat map. A held or booked object cannot be held again, which
/// makes it the single point that arbitrates competing reservations.
#[derive(Default)]
pub struct InMemorySeatInventory {
    state: Mutex<InventoryState>,
}

impl InMemorySeatInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_seat(&self, event_key: &str, key: &str, category_key: &str) {
        self.add_object(event_key, key, ObjectType::Seat, 1, category_key);
    }

    pub fn add_table(&self, event_key: &str, key: &str, seats: u32, category_key: &str) {
        self.add_object(event_key, key, ObjectType::Table, seats, category_key);
    }

    fn add_object(&self, event_key: &str, key: &str, object_type: ObjectType, capacity: u32, category_key: &str) {
        let object = InventoryObject {
            key: key.to_string(),
            label: key.to_string(),
            status: STATUS_FREE.to_string(),
            is_available: true,
            object_type,
            capacity,
            category_key: category_key.to_string(),
        };
        self.state().objects.insert(
            (event_key.to_string(), key.to_string()),
            SeatObject { object, hold_token: None },
        );
    }

    /// Make every call of `operation` fail with an external-service error.
    pub fn set_failing(&self, operation: InventoryOperation, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing.insert(operation);
        } else {
            state.failing.remove(&operation);
        }
    }

    pub fn status_of(&self, event_key: &str, key: &str) -> Option<String> {
        self.state()
            .objects
            .get(&(event_key.to_string(), key.to_string()))
            .map(|o| o.object.status.clone())
    }

    pub fn calls(&self) -> Vec<InventoryCall> {
        self.state().calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, InventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InventoryState {
    fn check(&self, operation: InventoryOperation) -> CoreResult<()> {
        if self.failing.contains(&operation) {
            return Err(CoreError::ExternalService(format!("seat inventory {:?} unavailable", operation)));
        }
        Ok(())
    }

    fn set_status(&mut self, event_key: &str, keys: &[String], status: &str) {
        for key in keys {
            if let Some(seat) = self.objects.get_mut(&(event_key.to_string(), key.clone())) {
                seat.object.status = status.to_string();
                seat.object.is_available = status == STATUS_FREE;
                if status == STATUS_FREE {
                    seat.hold_token = None;
                }
            }
        }
    }
}

#[async_trait]
impl SeatInventoryGateway for InMemorySeatInventory {
    async fn retrieve_objects(&self, event_key: &str, object_keys: &[String]) -> CoreResult<HashMap<String, InventoryObject>> {
        let state = self.state();
        state.check(InventoryOperation::Retrieve)?;
        Ok(object_keys
            .iter()
            .filter_map(|key| {
                state
                    .objects
                    .get(&(event_key.to_string(), key.clone()))
                    .map(|seat| (key.clone(), seat.object.clone()))
            })
            .collect())
    }

    async fn hold(&self, event_key: &str, _workspace_key: &str, _ttl_minutes: i32, object_keys: &[String]) -> CoreResult<HoldGrant> {
        let mut state = self.state();
        state.check(InventoryOperation::Hold)?;
        state.calls.push(InventoryCall::Hold {
            event_key: event_key.to_string(),
            object_keys: object_keys.to_vec(),
        });

        for key in object_keys {
            match state.objects.get(&(event_key.to_string(), key.clone())) {
                Some(seat) if seat.object.status == STATUS_FREE => {}
                Some(_) => return Err(CoreError::SeatConflict(format!("{} is not free", key))),
                None => return Err(CoreError::NotFound(format!("object {}", key))),
            }
        }

        let hold_token = format!("hold_{}", Uuid::new_v4().simple());
        for key in object_keys {
            if let Some(seat) = state.objects.get_mut(&(event_key.to_string(), key.clone())) {
                seat.object.status = STATUS_HELD.to_string();
                seat.object.is_available = false;
                seat.hold_token = Some(hold_token.clone());
            }
        }
        Ok(HoldGrant {
            per_object: object_keys.iter().map(|k| (k.clone(), hold_token.clone())).collect(),
            hold_token,
        })
    }

    async fn book(
        &self,
        event_key: &str,
        _workspace_key: &str,
        hold_token: &str,
        object_keys: &[String],
        order_id: &str,
    ) -> CoreResult<()> {
        let mut state = self.state();
        state.check(InventoryOperation::Book)?;
        state.calls.push(InventoryCall::Book {
            event_key: event_key.to_string(),
            hold_token: hold_token.to_string(),
            object_keys: object_keys.to_vec(),
            order_id: order_id.to_string(),
        });

        for key in object_keys {
            let held_by_token = state
                .objects
                .get(&(event_key.to_string(), key.clone()))
                .map(|seat| seat.hold_token.as_deref() == Some(hold_token))
                .unwrap_or(false);
            if !held_by_token {
                return Err(CoreError::SeatConflict(format!("{} is not held by {}", key, hold_token)));
            }
        }
        state.set_status(event_key, object_keys, STATUS_BOOKED);
        Ok(())
    }

    async fn free(&self, event_key: &str, _workspace_key: &str, object_keys: &[String]) -> CoreResult<()> {
        let mut state = self.state();
        state.check(InventoryOperation::Free)?;
        state.calls.push(InventoryCall::Free {
            event_key: event_key.to_string(),
            object_keys: object_keys.to_vec(),
        });
        state.set_status(event_key, object_keys, STATUS_FREE);
        Ok(())
    }

    async fn change_status(&self, event_key: &str, _workspace_key: &str, object_keys: &[String], status: &str) -> CoreResult<()> {
        let mut state = self.state();
        state.check(InventoryOperation::ChangeStatus)?;
        state.calls.push(InventoryCall::ChangeStatus {
            event_key: event_key.to_string(),
            object_keys: object_keys.to_vec(),
            status: status.to_string(),
        });
        state.set_status(event_key, object_keys, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_second_hold_is_rejected() {
        let inventory = InMemorySeatInventory::new();
        inventory.add_seat("evt", "A-1", "cat");
        inventory.add_seat("evt", "A-2", "cat");

        let grant = inventory.hold("evt", "ws", 15, &keys(&["A-1"])).await.unwrap();
        assert_eq!(grant.per_object.get("A-1"), Some(&grant.hold_token));

        let second = inventory.hold("evt", "ws", 15, &keys(&["A-2", "A-1"])).await;
        assert!(matches!(second, Err(CoreError::SeatConflict(_))));
        assert_eq!(inventory.status_of("evt", "A-2").as_deref(), Some(STATUS_FREE));
    }

    #[tokio::test]
    async fn test_book_requires_matching_token() {
        let inventory = InMemorySeatInventory::new();
        inventory.add_seat("evt", "A-1", "cat");
        let grant = inventory.hold("evt", "ws", 15, &keys(&["A-1"])).await.unwrap();

        assert!(inventory.book("evt", "ws", "other", &keys(&["A-1"]), "order").await.is_err());
        inventory.book("evt", "ws", &grant.hold_token, &keys(&["A-1"]), "order").await.unwrap();
        assert_eq!(inventory.status_of("evt", "A-1").as_deref(), Some(STATUS_BOOKED));
    }

    #[tokio::test]
    async fn test_free_is_idempotent_and_failures_injectable() {
        let inventory = InMemorySeatInventory::new();
        inventory.add_seat("evt", "A-1", "cat");
        inventory.hold("evt", "ws", 15, &keys(&["A-1"])).await.unwrap();

        inventory.free("evt", "ws", &keys(&["A-1"])).await.unwrap();
        inventory.free("evt", "ws", &keys(&["A-1"])).await.unwrap();
        assert_eq!(inventory.status_of("evt", "A-1").as_deref(), Some(STATUS_FREE));

        inventory.set_failing(InventoryOperation::Free, true);
        assert!(matches!(
            inventory.free("evt", "ws", &keys(&["A-1"])).await,
            Err(CoreError::ExternalService(_))
        ));
    }
}
