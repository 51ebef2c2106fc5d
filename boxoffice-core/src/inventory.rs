use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::ObjectType;
use crate::CoreResult;

/// Status string the seat-map service uses for an unheld object.
pub const STATUS_FREE: &str = "free";
pub const STATUS_BOOKED: &str = "booked";

/// Snapshot of one seat-map object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryObject {
    pub key: String,
    pub label: String,
    pub status: String,
    pub is_available: bool,
    pub object_type: ObjectType,
    /// Seats at a table; 1 for a seat.
    pub capacity: u32,
    pub category_key: String,
}

impl InventoryObject {
    pub fn is_free(&self) -> bool {
        self.status == STATUS_FREE && self.is_available
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoldGrant {
    pub hold_token: String,
    pub per_object: HashMap<String, String>,
}

/// External seat-map service. The hold token it grants is the only thing that
/// stops two reservations from claiming the same object.
#[async_trait]
pub trait SeatInventoryGateway: Send + Sync {
    async fn retrieve_objects(&self, event_key: &str, object_keys: &[String]) -> CoreResult<HashMap<String, InventoryObject>>;

    async fn hold(&self, event_key: &str, workspace_key: &str, ttl_minutes: i32, object_keys: &[String]) -> CoreResult<HoldGrant>;

    async fn book(
        &self,
        event_key: &str,
        workspace_key: &str,
        hold_token: &str,
        object_keys: &[String],
        order_id: &str,
    ) -> CoreResult<()>;

    /// Must be idempotent on objects that are already free.
    async fn free(&self, event_key: &str, workspace_key: &str, object_keys: &[String]) -> CoreResult<()>;

    async fn change_status(&self, event_key: &str, workspace_key: &str, object_keys: &[String], status: &str) -> CoreResult<()>;
}
