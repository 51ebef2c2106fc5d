use boxoffice_core::models::{Bill, PaymentProvider, PaymentStatus, Reservation, Ticket};
use boxoffice_core::repository::PageWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input of `create_reservation`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReservation {
    pub event_id: Uuid,
    /// Seat-map object keys (seats or whole tables).
    pub objects: Vec<String>,
    pub full_name: String,
    pub phone_number: String,
    #[serde(default)]
    pub discount: i64,
    #[serde(default)]
    pub preferred_provider: Option<PaymentProvider>,
}

/// How the caller of `confirm_payment` proves it may settle a bill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Internal trusted channel (point of sale, manual pay endpoint).
    SharedSecret(String),
    /// Settlement already verified against the provider (signed callback or status poll).
    ProviderVerified,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Confirmed { tickets: Vec<Ticket> },
    AlreadyPaid,
}

impl ConfirmOutcome {
    pub fn tickets(&self) -> &[Ticket] {
        match self {
            ConfirmOutcome::Confirmed { tickets } => tickets,
            ConfirmOutcome::AlreadyPaid => &[],
        }
    }
}

/// An operator follow-up created because the provider could not cancel programmatically.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingManualAction {
    pub payment_id: String,
    pub provider: PaymentProvider,
    pub reason: String,
}

impl PendingManualAction {
    pub fn from_bill(bill: &Bill) -> Self {
        Self {
            payment_id: bill.payment_id.clone(),
            provider: bill.provider,
            reason: bill
                .metadata
                .get("pending_action_reason")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CancelOutcome {
    pub canceled_tickets: Vec<i64>,
    /// Seat-map keys handed back to inventory, per event key.
    pub released: Vec<(String, Vec<String>)>,
    pub pending_manual_actions: Vec<PendingManualAction>,
}

// ============================================================================
// Read models
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LineItemView {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub price: i64,
    pub object_type: String,
    pub canceled: bool,
    pub remaining_hold_seconds: Option<i64>,
    pub ticket_number: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillView {
    pub payment_id: String,
    pub provider: PaymentProvider,
    pub amount: i64,
    pub status: PaymentStatus,
    pub redirect_url: Option<String>,
}

impl From<&Bill> for BillView {
    fn from(bill: &Bill) -> Self {
        Self {
            payment_id: bill.payment_id.clone(),
            provider: bill.provider,
            amount: bill.amount,
            status: bill.status,
            redirect_url: bill
                .metadata
                .get(REDIRECT_URL_KEY)
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }
}

/// Bill metadata key under which the provider's checkout URL is kept.
pub const REDIRECT_URL_KEY: &str = "redirect_url";

#[derive(Debug, Clone, Serialize)]
pub struct ReservationView {
    pub id: Uuid,
    pub event_id: Uuid,
    pub total_price: i64,
    pub discount: i64,
    pub paid: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub line_items: Vec<LineItemView>,
    pub bill: Option<BillView>,
    pub created_at: DateTime<Utc>,
}

impl ReservationView {
    pub fn build(reservation: &Reservation, bill: Option<BillView>, tickets: &[Ticket], now: DateTime<Utc>) -> Self {
        let remaining = reservation.remaining_hold_seconds(now);
        let line_items = reservation
            .line_items
            .iter()
            .map(|item| LineItemView {
                id: item.id,
                name: item.name.clone(),
                category: item.category_name.clone(),
                price: item.price,
                object_type: item.object_type.to_string(),
                canceled: item.canceled,
                remaining_hold_seconds: if item.hold.is_some() { remaining } else { None },
                ticket_number: tickets.iter().find(|t| t.line_item_id == item.id).map(|t| t.number),
            })
            .collect();

        Self {
            id: reservation.id,
            event_id: reservation.event_id,
            total_price: reservation.total_price,
            discount: reservation.discount,
            paid: reservation.paid,
            expires_at: if reservation.is_pending() { reservation.expires_at() } else { None },
            line_items,
            bill,
            created_at: reservation.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusView {
    pub payment_id: String,
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    pub amount: i64,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&Bill> for PaymentStatusView {
    fn from(bill: &Bill) -> Self {
        Self {
            payment_id: bill.payment_id.clone(),
            provider: bill.provider,
            status: bill.status,
            amount: bill.amount,
            paid_at: bill.paid_at,
        }
    }
}

/// Admission ticket as shown to its holder or to staff at the door.
#[derive(Debug, Clone, Serialize)]
pub struct TicketView {
    pub number: i64,
    pub reservation_id: Uuid,
    pub event_id: Uuid,
    pub seating_label: String,
    pub category_label: String,
    pub used: bool,
    pub canceled: bool,
    pub created_at: DateTime<Utc>,
}

impl TicketView {
    pub fn build(ticket: &Ticket, reservation: &Reservation) -> Self {
        let canceled = reservation
            .line_items
            .iter()
            .any(|item| item.id == ticket.line_item_id && item.canceled);
        Self {
            number: ticket.number,
            reservation_id: reservation.id,
            event_id: reservation.event_id,
            seating_label: ticket.seating_label.clone(),
            category_label: ticket.category_label.clone(),
            used: ticket.used,
            canceled,
            created_at: ticket.created_at,
        }
    }
}

// ============================================================================
// Pagination
// ============================================================================

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// 1-based page selector; out of range values are clamped.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn first_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: first_page(),
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn window(self) -> PageWindow {
        let page = self.normalized();
        PageWindow {
            offset: u64::from(page.page - 1) * u64::from(page.per_page),
            limit: u64::from(page.per_page),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        let request = request.normalized();
        let per_page = u64::from(request.per_page);
        Self {
            items,
            page: request.page,
            per_page: request.per_page,
            total,
            total_pages: total.div_ceil(per_page),
        }
    }

    pub fn empty(request: PageRequest) -> Self {
        Self::new(Vec::new(), request, 0)
    }
}

/// Result of one sweeper cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub released: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::models::{Category, EventConfig, HoldInfo, LineItem, ObjectType};
    use std::collections::HashMap;

    #[test]
    fn test_view_countdown_and_tickets() {
        let category = Category { id: Uuid::new_v4(), name: "VIP".into(), price: 10 };
        let event = EventConfig {
            id: Uuid::new_v4(),
            name: "Concert".into(),
            event_key: "evt".into(),
            workspace_key: "ws".into(),
            categories: vec![category.clone()],
        };
        let mut reservation = Reservation::new(&event, None, "Ali".into(), "0770".into(), 0);
        reservation.add_line_item(LineItem::new(reservation.id, "S1", "S1", &category, ObjectType::Seat));
        reservation.add_line_item(LineItem::new(reservation.id, "S2", "S2", &category, ObjectType::Seat));
        reservation.attach_hold(HoldInfo::new("tok", 15), &HashMap::new());

        let now = reservation.created_at + chrono::Duration::minutes(5);
        let view = ReservationView::build(&reservation, None, &[], now);
        assert_eq!(view.line_items.len(), 2);
        assert!(view.line_items.iter().all(|i| i.remaining_hold_seconds == Some(600)));
        assert!(view.expires_at.is_some());

        reservation.mark_paid();
        let ticket = Ticket {
            id: Uuid::new_v4(),
            number: 7,
            line_item_id: reservation.line_items[0].id,
            seating_label: "S1, seat".into(),
            category_label: "VIP".into(),
            used: false,
            created_at: now,
        };
        let view = ReservationView::build(&reservation, None, &[ticket], now);
        assert_eq!(view.line_items[0].ticket_number, Some(7));
        assert_eq!(view.line_items[1].ticket_number, None);
        assert!(view.line_items.iter().all(|i| i.remaining_hold_seconds.is_none()));
        assert!(view.expires_at.is_none());
    }

    #[test]
    fn test_pending_action_reason_from_metadata() {
        let mut bill = Bill::new(Uuid::new_v4(), "tran", PaymentProvider::Amwal, 20, serde_json::json!({}));
        bill.record_pending_action(boxoffice_core::models::PendingAction::Cancel, "dashboard only");
        let action = PendingManualAction::from_bill(&bill);
        assert_eq!(action.reason, "dashboard only");
        assert_eq!(action.provider, PaymentProvider::Amwal);
    }

    #[test]
    fn test_page_request_clamps_and_windows() {
        let window = PageRequest { page: 3, per_page: 10 }.window();
        assert_eq!(window, PageWindow { offset: 20, limit: 10 });

        let clamped = PageRequest { page: 0, per_page: 5000 }.normalized();
        assert_eq!((clamped.page, clamped.per_page), (1, MAX_PER_PAGE));
        assert_eq!(PageRequest { page: 1, per_page: 0 }.window().limit, 1);

        let page: Page<u8> = Page::new(vec![1, 2], PageRequest { page: 2, per_page: 2 }, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(Page::<u8>::empty(PageRequest::default()).total_pages, 0);
    }
}
