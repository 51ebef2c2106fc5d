use async_trait::async_trait;
use boxoffice_core::models::{Bill, EventConfig, Reservation, Ticket};
use boxoffice_core::repository::{EventCatalog, Listing, PageWindow, ReservationStore, TicketRecord, UnitOfWork};
use boxoffice_core::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    reservations: HashMap<Uuid, Reservation>,
    bills: HashMap<Uuid, Bill>,
    tickets: HashMap<i64, Ticket>,
    last_ticket_number: i64,
}

impl MemoryState {
    fn bill_by_payment_id(&self, payment_id: &str) -> Option<&Bill> {
        self.bills.values().find(|b| b.payment_id == payment_id)
    }

    fn bill_for_reservation(&self, reservation_id: Uuid) -> Option<&Bill> {
        self.bills.values().find(|b| b.reservation_id == reservation_id)
    }

    fn reservation_for_line_item(&self, line_item_id: Uuid) -> Option<Uuid> {
        self.reservations
            .values()
            .find(|r| r.line_items.iter().any(|i| i.id == line_item_id))
            .map(|r| r.id)
    }

    fn tickets_for(&self, reservation_id: Uuid) -> Vec<Ticket> {
        let Some(reservation) = self.reservations.get(&reservation_id) else {
            return Vec::new();
        };
        let mut tickets: Vec<Ticket> = self
            .tickets
            .values()
            .filter(|t| reservation.line_items.iter().any(|i| i.id == t.line_item_id))
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.number);
        tickets
    }

    fn ticket_record(&self, ticket: &Ticket) -> Option<TicketRecord> {
        self.reservation_for_line_item(ticket.line_item_id).map(|reservation_id| TicketRecord {
            ticket: ticket.clone(),
            reservation_id,
        })
    }

    fn owned_by(&self, reservation_id: Uuid, owner: Option<Uuid>) -> bool {
        owner.is_none() || self.reservations.get(&reservation_id).is_some_and(|r| r.user_id == owner)
    }

    fn pending(&self, predicate: impl Fn(DateTime<Utc>) -> bool) -> Vec<Reservation> {
        let mut found: Vec<Reservation> = self
            .reservations
            .values()
            .filter(|r| r.is_pending())
            .filter(|r| r.expires_at().map(&predicate).unwrap_or(false))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        found
    }
}

/// Process-local [`ReservationStore`].
///
/// A unit of work holds the store-wide lock until it commits or rolls back,
/// so it behaves like a transaction that row-locks everything. Reads wait for
/// an open unit of work to finish.
#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reservation_count(&self) -> usize {
        self.state.lock().await.reservations.len()
    }

    pub async fn ticket_count(&self) -> usize {
        self.state.lock().await.tickets.len()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn begin(&self) -> CoreResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            snapshot: Some(snapshot),
        }))
    }

    async fn get_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn get_bill(&self, payment_id: &str) -> CoreResult<Option<Bill>> {
        Ok(self.state.lock().await.bill_by_payment_id(payment_id).cloned())
    }

    async fn get_bill_for_reservation(&self, reservation_id: Uuid) -> CoreResult<Option<Bill>> {
        Ok(self.state.lock().await.bill_for_reservation(reservation_id).cloned())
    }

    async fn tickets_for_reservation(&self, reservation_id: Uuid) -> CoreResult<Vec<Ticket>> {
        Ok(self.state.lock().await.tickets_for(reservation_id))
    }

    async fn find_expired_unpaid(&self, now: DateTime<Utc>) -> CoreResult<Vec<Reservation>> {
        Ok(self.state.lock().await.pending(|expires_at| expires_at < now))
    }

    async fn find_expiring(&self, now: DateTime<Utc>, until: DateTime<Utc>) -> CoreResult<Vec<Reservation>> {
        Ok(self
            .state
            .lock()
            .await
            .pending(|expires_at| expires_at >= now && expires_at < until))
    }

    async fn pending_manual_actions(&self) -> CoreResult<Vec<Bill>> {
        let state = self.state.lock().await;
        let mut bills: Vec<Bill> = state
            .bills
            .values()
            .filter(|b| b.pending_action.is_some())
            .cloned()
            .collect();
        bills.sort_by_key(|b| b.created_at);
        Ok(bills)
    }

    async fn list_reservations(&self, owner: Option<Uuid>, window: PageWindow) -> CoreResult<Listing<Reservation>> {
        let state = self.state.lock().await;
        let mut found: Vec<&Reservation> = state
            .reservations
            .values()
            .filter(|r| owner.is_none() || r.user_id == owner)
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page_of(found.into_iter().cloned().collect(), window))
    }

    async fn get_ticket(&self, number: i64) -> CoreResult<Option<TicketRecord>> {
        let state = self.state.lock().await;
        Ok(state.tickets.get(&number).and_then(|t| state.ticket_record(t)))
    }

    async fn list_tickets(&self, owner: Option<Uuid>, window: PageWindow) -> CoreResult<Listing<TicketRecord>> {
        let state = self.state.lock().await;
        let mut found: Vec<TicketRecord> = state
            .tickets
            .values()
            .filter_map(|t| state.ticket_record(t))
            .filter(|r| state.owned_by(r.reservation_id, owner))
            .collect();
        found.sort_by_key(|r| r.ticket.number);
        Ok(page_of(found, window))
    }
}

fn page_of<T>(rows: Vec<T>, window: PageWindow) -> Listing<T> {
    let total = rows.len() as u64;
    let items = rows
        .into_iter()
        .skip(usize::try_from(window.offset).unwrap_or(usize::MAX))
        .take(usize::try_from(window.limit).unwrap_or(usize::MAX))
        .collect();
    Listing { items, total }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    /// State at `begin`; restored unless the unit of work commits.
    snapshot: Option<MemoryState>,
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn insert_reservation(&mut self, reservation: &Reservation) -> CoreResult<()> {
        if self.guard.reservations.contains_key(&reservation.id) {
            return Err(CoreError::Storage(format!("duplicate reservation {}", reservation.id)));
        }
        self.guard.reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn insert_bill(&mut self, bill: &Bill) -> CoreResult<()> {
        if self.guard.bill_by_payment_id(&bill.payment_id).is_some() {
            return Err(CoreError::Storage(format!("duplicate payment id {}", bill.payment_id)));
        }
        if self.guard.bill_for_reservation(bill.reservation_id).is_some() {
            return Err(CoreError::Storage(format!("reservation {} already has a bill", bill.reservation_id)));
        }
        if !self.guard.reservations.contains_key(&bill.reservation_id) {
            return Err(CoreError::Storage(format!("reservation {} does not exist", bill.reservation_id)));
        }
        self.guard.bills.insert(bill.id, bill.clone());
        Ok(())
    }

    async fn lock_reservation(&mut self, id: Uuid) -> CoreResult<Option<Reservation>> {
        Ok(self.guard.reservations.get(&id).cloned())
    }

    async fn lock_bill(&mut self, payment_id: &str) -> CoreResult<Option<Bill>> {
        Ok(self.guard.bill_by_payment_id(payment_id).cloned())
    }

    async fn lock_bill_for_reservation(&mut self, reservation_id: Uuid) -> CoreResult<Option<Bill>> {
        Ok(self.guard.bill_for_reservation(reservation_id).cloned())
    }

    async fn lock_tickets(&mut self, numbers: &[i64]) -> CoreResult<Vec<TicketRecord>> {
        let mut records = Vec::new();
        for number in numbers {
            let Some(ticket) = self.guard.tickets.get(number) else {
                continue;
            };
            let reservation_id = self.guard.reservation_for_line_item(ticket.line_item_id).ok_or_else(|| {
                CoreError::Integrity(format!("ticket {} has no owning reservation", ticket.number))
            })?;
            records.push(TicketRecord {
                ticket: ticket.clone(),
                reservation_id,
            });
        }
        records.sort_by_key(|r| r.ticket.number);
        Ok(records)
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> CoreResult<()> {
        let stored = self
            .guard
            .reservations
            .get_mut(&reservation.id)
            .ok_or_else(|| CoreError::NotFound(format!("reservation {}", reservation.id)))?;
        stored.total_price = reservation.total_price;
        stored.paid = reservation.paid;
        stored.hold = reservation.hold.clone();
        for item in &mut stored.line_items {
            if let Some(updated) = reservation.line_items.iter().find(|i| i.id == item.id) {
                item.canceled = updated.canceled;
                item.hold = updated.hold.clone();
            }
        }
        Ok(())
    }

    async fn update_bill(&mut self, bill: &Bill) -> CoreResult<()> {
        let stored = self
            .guard
            .bills
            .get_mut(&bill.id)
            .ok_or_else(|| CoreError::NotFound(format!("bill {}", bill.payment_id)))?;
        stored.status = bill.status;
        stored.metadata = bill.metadata.clone();
        stored.pending_action = bill.pending_action;
        stored.paid_at = bill.paid_at;
        Ok(())
    }

    async fn tickets_for_reservation(&mut self, reservation_id: Uuid) -> CoreResult<Vec<Ticket>> {
        Ok(self.guard.tickets_for(reservation_id))
    }

    async fn issue_ticket(&mut self, line_item_id: Uuid, seating_label: &str, category_label: &str) -> CoreResult<Ticket> {
        if self.guard.tickets.values().any(|t| t.line_item_id == line_item_id) {
            return Err(CoreError::Storage(format!("line item {} already has a ticket", line_item_id)));
        }
        self.guard.last_ticket_number += 1;
        let ticket = Ticket {
            id: Uuid::new_v4(),
            number: self.guard.last_ticket_number,
            line_item_id,
            seating_label: seating_label.to_string(),
            category_label: category_label.to_string(),
            used: false,
            created_at: Utc::now(),
        };
        self.guard.tickets.insert(ticket.number, ticket.clone());
        Ok(ticket)
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> CoreResult<()> {
        let stored = self
            .guard
            .tickets
            .get_mut(&ticket.number)
            .ok_or_else(|| CoreError::NotFound(format!("ticket {}", ticket.number)))?;
        stored.used = ticket.used;
        Ok(())
    }

    async fn delete_reservation(&mut self, id: Uuid) -> CoreResult<()> {
        if !self.guard.tickets_for(id).is_empty() {
            return Err(CoreError::Integrity(format!("reservation {} has issued tickets", id)));
        }
        self.guard.reservations.remove(&id);
        self.guard.bills.retain(|_, b| b.reservation_id != id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        let mut this = self;
        this.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        // Drop restores the snapshot.
        drop(self);
        Ok(())
    }
}

/// Process-local [`EventCatalog`].
#[derive(Default)]
pub struct InMemoryEventCatalog {
    events: RwLock<HashMap<Uuid, EventConfig>>,
}

impl InMemoryEventCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, event: EventConfig) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.id, event);
    }
}

#[async_trait]
impl EventCatalog for InMemoryEventCatalog {
    async fn get_event(&self, event_id: Uuid) -> CoreResult<Option<EventConfig>> {
        Ok(self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_id)
            .cloned())
    }
}
