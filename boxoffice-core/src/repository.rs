use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Bill, EventConfig, Reservation, Ticket};
use crate::CoreResult;

/// Read access to event and category configuration.
#[async_trait]
pub trait EventCatalog: Send + Sync {
    async fn get_event(&self, event_id: Uuid) -> CoreResult<Option<EventConfig>>;
}

/// A ticket together with the reservation that owns its line item.
#[derive(Debug, Clone)]
pub struct TicketRecord {
    pub ticket: Ticket,
    pub reservation_id: Uuid,
}

/// Durable record of reservations, bills and tickets.
///
/// Reads here are untracked snapshots. Anything that mutates goes through a
/// [`UnitOfWork`], which locks the rows it touches until commit or rollback.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn begin(&self) -> CoreResult<Box<dyn UnitOfWork>>;

    async fn get_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>>;

    async fn get_bill(&self, payment_id: &str) -> CoreResult<Option<Bill>>;

    async fn get_bill_for_reservation(&self, reservation_id: Uuid) -> CoreResult<Option<Bill>>;

    async fn tickets_for_reservation(&self, reservation_id: Uuid) -> CoreResult<Vec<Ticket>>;

    /// Unpaid reservations with a hold whose `created + ttl < now`.
    async fn find_expired_unpaid(&self, now: DateTime<Utc>) -> CoreResult<Vec<Reservation>>;

    /// Unpaid reservations with a hold expiring in `[now, until)`.
    async fn find_expiring(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> CoreResult<Vec<Reservation>>;

    /// Bills waiting on an operator to act in the provider dashboard.
    async fn pending_manual_actions(&self) -> CoreResult<Vec<Bill>>;

    /// Newest first. `owner` limits the listing to one user's reservations.
    async fn list_reservations(&self, owner: Option<Uuid>, window: PageWindow) -> CoreResult<Listing<Reservation>>;

    async fn get_ticket(&self, number: i64) -> CoreResult<Option<TicketRecord>>;

    /// Ordered by ticket number. `owner` limits the listing to tickets of one user's reservations.
    async fn list_tickets(&self, owner: Option<Uuid>, window: PageWindow) -> CoreResult<Listing<TicketRecord>>;
}

/// Offset window of a paginated read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: u64,
    pub limit: u64,
}

/// One page of rows plus the number of rows across all pages.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Explicit transaction boundary. Dropping without `commit` rolls back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Insert the reservation and all of its line items.
    async fn insert_reservation(&mut self, reservation: &Reservation) -> CoreResult<()>;

    async fn insert_bill(&mut self, bill: &Bill) -> CoreResult<()>;

    /// Lock and load a reservation with its line items.
    async fn lock_reservation(&mut self, id: Uuid) -> CoreResult<Option<Reservation>>;

    async fn lock_bill(&mut self, payment_id: &str) -> CoreResult<Option<Bill>>;

    async fn lock_bill_for_reservation(&mut self, reservation_id: Uuid) -> CoreResult<Option<Bill>>;

    /// Lock tickets by number. Missing numbers are simply absent from the result.
    async fn lock_tickets(&mut self, numbers: &[i64]) -> CoreResult<Vec<TicketRecord>>;

    /// Persist paid flag, total and hold of the reservation plus the
    /// canceled flag and hold of each line item.
    async fn update_reservation(&mut self, reservation: &Reservation) -> CoreResult<()>;

    async fn update_bill(&mut self, bill: &Bill) -> CoreResult<()>;

    async fn tickets_for_reservation(&mut self, reservation_id: Uuid) -> CoreResult<Vec<Ticket>>;

    /// Create a ticket for a line item, numbered from the global sequence.
    async fn issue_ticket(&mut self, line_item_id: Uuid, seating_label: &str, category_label: &str) -> CoreResult<Ticket>;

    async fn update_ticket(&mut self, ticket: &Ticket) -> CoreResult<()>;

    /// Delete a reservation; line items and bill go with it.
    async fn delete_reservation(&mut self, id: Uuid) -> CoreResult<()>;

    async fn commit(self: Box<Self>) -> CoreResult<()>;

    async fn rollback(self: Box<Self>) -> CoreResult<()>;
}
