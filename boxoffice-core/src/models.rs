use boxoffice_shared::Masked;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

// ============================================================================
// Requester
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    User,
    Provider,
    PointOfSale,
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "USER" => Ok(Role::User),
            "PROVIDER" => Ok(Role::Provider),
            "POINT_OF_SALE" | "POS" => Ok(Role::PointOfSale),
            other => Err(CoreError::Validation(format!("unknown role {}", other))),
        }
    }
}

/// The authenticated caller of a coordinator operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Option<Uuid>,
    pub role: Role,
}

impl Requester {
    pub fn new(user_id: Option<Uuid>, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_point_of_sale(&self) -> bool {
        self.role == Role::PointOfSale
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Box-office staff: admins, event providers and point-of-sale terminals.
    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Provider | Role::PointOfSale)
    }
}

// ============================================================================
// Event configuration (read-only, owned by event management)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub id: Uuid,
    pub name: String,
    /// Event key in the seat-map service.
    pub event_key: String,
    pub workspace_key: String,
    pub categories: Vec<Category>,
}

impl EventConfig {
    /// Resolve a seat-map category key to the event's category.
    pub fn category(&self, category_key: &str) -> Option<&Category> {
        let id = Uuid::parse_str(category_key).ok()?;
        self.categories.iter().find(|c| c.id == id)
    }
}

// ============================================================================
// Reservation aggregate
// ============================================================================

/// Hold token granted by the seat-map service and its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoldInfo {
    pub hold_token: String,
    pub ttl_minutes: i32,
}

impl HoldInfo {
    pub fn new(hold_token: impl Into<String>, ttl_minutes: i32) -> Self {
        Self {
            hold_token: hold_token.into(),
            ttl_minutes,
        }
    }

    pub fn expires_at(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + Duration::minutes(i64::from(self.ttl_minutes))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Seat,
    Table,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Seat => "seat",
            ObjectType::Table => "table",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "seat" | "generaladmission" | "booth" => Ok(ObjectType::Seat),
            "table" => Ok(ObjectType::Table),
            other => Err(CoreError::Validation(format!("unsupported object type {}", other))),
        }
    }
}

/// One purchasable unit: a seat, or one slot of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub reservation_id: Uuid,
    /// Key of the underlying seat-map object. Table slots share their table's key.
    pub object_key: String,
    /// Display label, e.g. `A-12` or `T4-2`.
    pub name: String,
    pub category_id: Uuid,
    pub category_name: String,
    pub price: i64,
    pub object_type: ObjectType,
    pub hold: Option<HoldInfo>,
    pub canceled: bool,
    pub created_at: DateTime<Utc>,
}

impl LineItem {
    pub fn new(
        reservation_id: Uuid,
        object_key: impl Into<String>,
        name: impl Into<String>,
        category: &Category,
        object_type: ObjectType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reservation_id,
            object_key: object_key.into(),
            name: name.into(),
            category_id: category.id,
            category_name: category.name.clone(),
            price: category.price,
            object_type,
            hold: None,
            canceled: false,
            created_at: Utc::now(),
        }
    }

    /// Mark as canceled (never delete)
    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    /// Label printed on the ticket.
    pub fn seating_label(&self) -> String {
        format!("{}, {}", self.name, self.object_type)
    }
}

/// Root aggregate for one checkout attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub event_id: Uuid,
    pub event_key: String,
    pub workspace_key: String,
    pub user_id: Option<Uuid>,
    pub customer_name: Masked<String>,
    pub customer_phone: Masked<String>,
    pub line_items: Vec<LineItem>,
    pub total_price: i64,
    pub discount: i64,
    pub paid: bool,
    pub hold: Option<HoldInfo>,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        event: &EventConfig,
        user_id: Option<Uuid>,
        customer_name: Masked<String>,
        customer_phone: Masked<String>,
        discount: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event.id,
            event_key: event.event_key.clone(),
            workspace_key: event.workspace_key.clone(),
            user_id,
            customer_name,
            customer_phone,
            line_items: Vec::new(),
            total_price: 0,
            discount,
            paid: false,
            hold: None,
            created_at: Utc::now(),
        }
    }

    pub fn add_line_item(&mut self, mut item: LineItem) {
        item.reservation_id = self.id;
        self.total_price += item.price;
        self.line_items.push(item);
    }

    /// Sum of prices of line items that are not canceled.
    pub fn calculate_active_total(&self) -> i64 {
        self.line_items
            .iter()
            .filter(|item| !item.canceled)
            .map(|item| item.price)
            .sum()
    }

    /// Amount the buyer owes after discount.
    pub fn amount_due(&self) -> i64 {
        (self.total_price - self.discount).max(0)
    }

    /// Copy the hold onto the reservation and every line item.
    pub fn attach_hold(&mut self, hold: HoldInfo, per_object: &std::collections::HashMap<String, String>) {
        for item in &mut self.line_items {
            let token = per_object
                .get(&item.object_key)
                .cloned()
                .unwrap_or_else(|| hold.hold_token.clone());
            item.hold = Some(HoldInfo::new(token, hold.ttl_minutes));
        }
        self.hold = Some(hold);
    }

    /// A reservation with a hold that has not been paid.
    pub fn is_pending(&self) -> bool {
        self.hold.is_some() && !self.paid
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.hold.as_ref().map(|h| h.expires_at(self.created_at))
    }

    /// `created + ttl < now` for an unpaid, held reservation.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.expires_at().map(|at| at < now).unwrap_or(false)
    }

    pub fn remaining_hold_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.is_pending() {
            return None;
        }
        self.expires_at().map(|at| (at - now).num_seconds().max(0))
    }

    /// Distinct seat-map keys backing the line items, in line-item order.
    pub fn inventory_keys(&self) -> Vec<String> {
        distinct_keys(self.line_items.iter())
    }

    /// Flip to paid and drop the hold: the inventory is now booked.
    pub fn mark_paid(&mut self) {
        self.paid = true;
        self.hold = None;
        for item in &mut self.line_items {
            item.hold = None;
        }
    }

    /// Cancel the given line items, decrementing the total by each newly
    /// canceled price. Returns the ids actually canceled.
    pub fn cancel_line_items(&mut self, ids: &[Uuid]) -> Vec<Uuid> {
        let mut canceled = Vec::new();
        for item in self.line_items.iter_mut().filter(|i| ids.contains(&i.id)) {
            if item.canceled {
                continue;
            }
            item.cancel();
            self.total_price -= item.price;
            canceled.push(item.id);
        }
        canceled
    }
}

fn distinct_keys<'a>(items: impl Iterator<Item = &'a LineItem>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for item in items {
        if !keys.contains(&item.object_key) {
            keys.push(item.object_key.clone());
        }
    }
    keys
}

// ============================================================================
// Bill
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    NotPaid,
    Paid,
    Canceled,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::NotPaid => "NOT_PAID",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Canceled => "CANCELED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    /// Forward-only transitions, plus administrative cancel/refund from Paid.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (NotPaid, Paid) | (NotPaid, Failed) | (NotPaid, Canceled) | (Paid, Refunded) | (Paid, Canceled) | (Failed, Canceled)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_PAID" => Ok(PaymentStatus::NotPaid),
            "PAID" => Ok(PaymentStatus::Paid),
            "CANCELED" => Ok(PaymentStatus::Canceled),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(CoreError::Integrity(format!("unknown payment status {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Amwal,
    Cash,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Amwal => "amwal",
            PaymentProvider::Cash => "cash",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amwal" => Ok(PaymentProvider::Amwal),
            "cash" => Ok(PaymentProvider::Cash),
            other => Err(CoreError::Validation(format!("unknown payment provider {}", other))),
        }
    }
}

/// Follow-up an operator has to perform in the provider's dashboard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PendingAction {
    Cancel,
    Refund,
}

impl PendingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingAction::Cancel => "cancel",
            PendingAction::Refund => "refund",
        }
    }
}

impl FromStr for PendingAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cancel" => Ok(PendingAction::Cancel),
            "refund" => Ok(PendingAction::Refund),
            other => Err(CoreError::Integrity(format!("unknown pending action {}", other))),
        }
    }
}

/// Payment record, 1:1 with a reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    pub id: Uuid,
    pub reservation_id: Uuid,
    /// Provider's payment id (transaction reference).
    pub payment_id: String,
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    pub amount: i64,
    pub metadata: serde_json::Value,
    pub pending_action: Option<PendingAction>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Bill {
    pub fn new(
        reservation_id: Uuid,
        payment_id: impl Into<String>,
        provider: PaymentProvider,
        amount: i64,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reservation_id,
            payment_id: payment_id.into(),
            provider,
            status: PaymentStatus::NotPaid,
            amount,
            metadata,
            pending_action: None,
            paid_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }

    /// Move to `next`, rejecting backward transitions.
    pub fn transition(&mut self, next: PaymentStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "bill {} cannot move from {} to {}",
                self.payment_id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.transition(PaymentStatus::Paid)?;
        self.paid_at = Some(at);
        Ok(())
    }

    /// Record an operator follow-up and the reason the provider call did not happen.
    pub fn record_pending_action(&mut self, action: PendingAction, reason: &str) {
        self.pending_action = Some(action);
        if !self.metadata.is_object() {
            self.metadata = serde_json::json!({});
        }
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert("pending_action_reason".to_string(), serde_json::Value::String(reason.to_string()));
        }
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Admission credential, created once per line item after payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub number: i64,
    pub line_item_id: Uuid,
    pub seating_label: String,
    pub category_label: String,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    pub fn mark_used(&mut self) -> CoreResult<()> {
        if self.used {
            return Err(CoreError::Conflict(format!("ticket {} already used", self.number)));
        }
        self.used = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn event() -> EventConfig {
        EventConfig {
            id: Uuid::new_v4(),
            name: "Concert".into(),
            event_key: "evt-1".into(),
            workspace_key: "ws-1".into(),
            categories: vec![Category { id: Uuid::new_v4(), name: "VIP".into(), price: 10 }],
        }
    }

    fn reservation_with(keys: &[(&str, &str)]) -> Reservation {
        let event = event();
        let mut r = Reservation::new(&event, None, "Ali".into(), "0770".into(), 0);
        for (key, name) in keys {
            let item = LineItem::new(r.id, *key, *name, &event.categories[0], ObjectType::Seat);
            r.add_line_item(item);
        }
        r
    }

    #[test]
    fn test_total_tracks_line_items() {
        let r = reservation_with(&[("S1", "S1"), ("S2", "S2")]);
        assert_eq!(r.total_price, 20);
        assert_eq!(r.total_price, r.calculate_active_total());
        assert!(r.line_items.iter().all(|i| i.reservation_id == r.id));
    }

    #[test]
    fn test_cancel_line_items_is_idempotent() {
        let mut r = reservation_with(&[("S1", "S1"), ("S2", "S2")]);
        let first = r.line_items[0].id;

        assert_eq!(r.cancel_line_items(&[first]), vec![first]);
        assert_eq!(r.total_price, 10);
        assert!(r.cancel_line_items(&[first]).is_empty());
        assert_eq!(r.total_price, 10);
        assert_eq!(r.total_price, r.calculate_active_total());
    }

    #[test]
    fn test_expiry_predicate() {
        let mut r = reservation_with(&[("S1", "S1")]);
        assert!(!r.is_expired(Utc::now() + Duration::minutes(60)), "no hold, never expires");

        r.attach_hold(HoldInfo::new("tok", 15), &HashMap::new());
        let created = r.created_at;
        assert!(!r.is_expired(created + Duration::minutes(14)));
        assert!(r.is_expired(created + Duration::minutes(16)));
        assert_eq!(r.remaining_hold_seconds(created + Duration::minutes(10)), Some(300));

        r.mark_paid();
        assert!(!r.is_expired(created + Duration::minutes(16)));
        assert_eq!(r.remaining_hold_seconds(created), None);
        assert!(r.line_items.iter().all(|i| i.hold.is_none()));
    }

    #[test]
    fn test_attach_hold_uses_per_object_tokens() {
        let mut r = reservation_with(&[("S1", "S1"), ("S2", "S2")]);
        let mut per_object = HashMap::new();
        per_object.insert("S1".to_string(), "tok-s1".to_string());
        r.attach_hold(HoldInfo::new("tok", 15), &per_object);

        assert_eq!(r.line_items[0].hold.as_ref().map(|h| h.hold_token.as_str()), Some("tok-s1"));
        assert_eq!(r.line_items[1].hold.as_ref().map(|h| h.hold_token.as_str()), Some("tok"));
    }

    #[test]
    fn test_inventory_keys_are_distinct() {
        let r = reservation_with(&[("T1", "T1-1"), ("T1", "T1-2"), ("S9", "S9")]);
        assert_eq!(r.inventory_keys(), vec!["T1".to_string(), "S9".to_string()]);
    }

    #[test]
    fn test_bill_transitions() {
        let mut bill = Bill::new(Uuid::new_v4(), "tran-1", PaymentProvider::Amwal, 20, serde_json::json!({}));
        assert!(bill.transition(PaymentStatus::Refunded).is_err());
        bill.mark_paid(Utc::now()).unwrap();
        assert!(bill.paid_at.is_some());
        assert!(bill.transition(PaymentStatus::Failed).is_err());
        bill.transition(PaymentStatus::Canceled).unwrap();
        assert!(bill.transition(PaymentStatus::Paid).is_err());
    }

    #[test]
    fn test_pending_action_keeps_metadata() {
        let mut bill = Bill::new(Uuid::new_v4(), "tran-1", PaymentProvider::Amwal, 20, serde_json::json!({"cart_id": "x"}));
        bill.record_pending_action(PendingAction::Cancel, "unsupported");
        assert_eq!(bill.pending_action, Some(PendingAction::Cancel));
        assert_eq!(bill.metadata["cart_id"], "x");
        assert_eq!(bill.metadata["pending_action_reason"], "unsupported");
    }

    #[test]
    fn test_ticket_used_once() {
        let mut ticket = Ticket {
            id: Uuid::new_v4(),
            number: 1,
            line_item_id: Uuid::new_v4(),
            seating_label: "A-1, seat".into(),
            category_label: "VIP".into(),
            used: false,
            created_at: Utc::now(),
        };
        ticket.mark_used().unwrap();
        assert!(matches!(ticket.mark_used(), Err(CoreError::Conflict(_))));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("amwal".parse::<PaymentProvider>().unwrap(), PaymentProvider::Amwal);
        assert_eq!("POINT_OF_SALE".parse::<Role>().unwrap(), Role::PointOfSale);
        assert_eq!("table".parse::<ObjectType>().unwrap(), ObjectType::Table);
        assert!("paypal".parse::<PaymentProvider>().is_err());
    }
}
