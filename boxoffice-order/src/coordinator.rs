use boxoffice_core::inventory::{SeatInventoryGateway, STATUS_FREE};
use boxoffice_core::models::{
    Bill, HoldInfo, LineItem, ObjectType, PaymentProvider, PaymentStatus, PendingAction, Requester, Reservation, Ticket,
};
use boxoffice_core::payment::{CallbackStatus, PaymentRequest};
use boxoffice_core::repository::{EventCatalog, ReservationStore, UnitOfWork};
use boxoffice_core::{CoreError, CoreResult};
use boxoffice_shared::Masked;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::changes::ChangeHandler;
use crate::fulfillment::FulfillmentService;
use crate::models::{
    BillView, CancelOutcome, ConfirmOutcome, Confirmation, CreateReservation, Page, PageRequest, PaymentStatusView,
    PendingManualAction, ReservationView, TicketView, REDIRECT_URL_KEY,
};
use crate::registry::{PaymentGatewayRegistry, PaymentMethod};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub hold_minutes: i32,
    pub currency: String,
    /// Shared secret of the internal confirmation channel. Empty disables it.
    pub confirmation_secret: String,
    /// Upper bound on every seat-inventory and payment-provider call.
    pub call_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            hold_minutes: 15,
            currency: "IQD".to_string(),
            confirmation_secret: String::new(),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Runs the reservation saga across the seat inventory, the payment
/// providers and the local store.
pub struct ReservationCoordinator {
    store: Arc<dyn ReservationStore>,
    catalog: Arc<dyn EventCatalog>,
    inventory: Arc<dyn SeatInventoryGateway>,
    registry: Arc<PaymentGatewayRegistry>,
    settings: CoordinatorSettings,
}

impl ReservationCoordinator {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        catalog: Arc<dyn EventCatalog>,
        inventory: Arc<dyn SeatInventoryGateway>,
        registry: Arc<PaymentGatewayRegistry>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            inventory,
            registry,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    pub fn inventory(&self) -> &Arc<dyn SeatInventoryGateway> {
        &self.inventory
    }

    // ========================================================================
    // CreateReservation
    // ========================================================================

    pub async fn create_reservation(&self, cmd: CreateReservation, requester: &Requester) -> CoreResult<ReservationView> {
        validate_selection(&cmd)?;

        let event = self
            .catalog
            .get_event(cmd.event_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("event {}", cmd.event_id)))?;

        // The seat map is the only availability authority.
        let objects = self
            .inventory_call("retrieve objects", self.inventory.retrieve_objects(&event.event_key, &cmd.objects))
            .await?;
        if objects.len() != cmd.objects.len() {
            return Err(CoreError::SeatConflict(format!(
                "{} of {} requested objects exist",
                objects.len(),
                cmd.objects.len()
            )));
        }

        let mut reservation = Reservation::new(
            &event,
            requester.user_id,
            Masked::new(cmd.full_name.trim().to_string()),
            Masked::new(cmd.phone_number.trim().to_string()),
            cmd.discount,
        );
        for key in &cmd.objects {
            let object = objects
                .get(key)
                .ok_or_else(|| CoreError::SeatConflict(format!("{} is not available", key)))?;
            if !object.is_free() {
                return Err(CoreError::SeatConflict(format!("{} is {}", key, object.status)));
            }
            let category = event
                .category(&object.category_key)
                .ok_or_else(|| CoreError::NotFound(format!("category {} of {}", object.category_key, key)))?;

            match object.object_type {
                ObjectType::Seat => {
                    reservation.add_line_item(LineItem::new(reservation.id, key.as_str(), object.label.as_str(), category, ObjectType::Seat));
                }
                ObjectType::Table => {
                    for slot in 1..=object.capacity.max(1) {
                        let name = format!("{}-{}", object.label, slot);
                        reservation.add_line_item(LineItem::new(reservation.id, key.as_str(), name, category, ObjectType::Table));
                    }
                }
            }
        }

        if cmd.discount > reservation.total_price {
            return Err(CoreError::Validation(format!(
                "discount {} exceeds total {}",
                cmd.discount, reservation.total_price
            )));
        }

        // Resolved before the hold so an unconfigured provider never leaves a dangling hold.
        let provider = cmd.preferred_provider.unwrap_or_else(|| {
            if requester.is_point_of_sale() {
                PaymentProvider::Cash
            } else {
                self.registry.primary()
            }
        });
        let gateway = self.registry.get_gateway(provider)?;

        let grant = self
            .inventory_call(
                "hold",
                self.inventory
                    .hold(&event.event_key, &event.workspace_key, self.settings.hold_minutes, &cmd.objects),
            )
            .await?;
        reservation.attach_hold(HoldInfo::new(grant.hold_token.clone(), self.settings.hold_minutes), &grant.per_object);
        debug!(reservation_id = %reservation.id, hold_token = %grant.hold_token, "Inventory held");

        let request = PaymentRequest {
            reservation_id: reservation.id,
            amount: reservation.amount_due(),
            currency: self.settings.currency.clone(),
            customer_name: reservation.customer_name.clone(),
            customer_phone: reservation.customer_phone.clone(),
            description: format!("{} x{}", event.name, reservation.line_items.len()),
        };

        let mut uow = self.store.begin().await?;
        let result = async {
            uow.insert_reservation(&reservation).await?;

            let intent = self
                .payment_call("create payment", gateway.create_payment(&request))
                .await
                .inspect_err(|e| {
                    warn!(reservation_id = %reservation.id, error = %e, "Payment intent failed, hold left to expire");
                })?;

            let mut metadata = intent.metadata;
            if let (Some(url), Some(map)) = (intent.redirect_url, metadata.as_object_mut()) {
                map.insert(REDIRECT_URL_KEY.to_string(), serde_json::Value::String(url));
            }
            let bill = Bill::new(reservation.id, intent.payment_id, provider, reservation.amount_due(), metadata);
            uow.insert_bill(&bill).await?;
            Ok::<_, CoreError>(bill)
        }
        .await;
        let bill = finish(uow, result).await?;

        info!(
            reservation_id = %reservation.id,
            payment_id = %bill.payment_id,
            provider = %provider,
            total = reservation.total_price,
            items = reservation.line_items.len(),
            "Reservation created"
        );

        if requester.is_point_of_sale() {
            let secret = Confirmation::SharedSecret(self.settings.confirmation_secret.clone());
            self.confirm_payment(&bill.payment_id, secret).await?;
            return self.view(reservation.id).await;
        }

        Ok(ReservationView::build(&reservation, Some(BillView::from(&bill)), &[], Utc::now()))
    }

    // ========================================================================
    // ConfirmPayment
    // ========================================================================

    /// Settle a bill: book the held inventory, mark bill and reservation paid
    /// and issue tickets. Confirming a paid bill again is a successful no-op.
    pub async fn confirm_payment(&self, payment_id: &str, confirmation: Confirmation) -> CoreResult<ConfirmOutcome> {
        let secret = match &confirmation {
            Confirmation::SharedSecret(secret) => {
                if self.settings.confirmation_secret.is_empty() || *secret != self.settings.confirmation_secret {
                    warn!(payment_id, "Confirmation rejected: secret mismatch");
                    return Err(CoreError::Authorization("invalid confirmation secret".to_string()));
                }
                Some(secret.as_str())
            }
            Confirmation::ProviderVerified => None,
        };

        let bill = self
            .store
            .get_bill(payment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("bill {}", payment_id)))?;
        match bill.status {
            PaymentStatus::Paid => return Ok(ConfirmOutcome::AlreadyPaid),
            PaymentStatus::NotPaid => {}
            other => return Err(CoreError::Conflict(format!("bill {} is {}", payment_id, other))),
        }

        let gateway = self.registry.get_gateway(bill.provider)?;
        self.payment_call("confirm payment", gateway.confirm_payment(payment_id, secret))
            .await?;

        let mut uow = self.store.begin().await?;
        let result = self.settle(uow.as_mut(), bill.reservation_id, payment_id).await;
        let outcome = finish(uow, result).await?;

        if let ConfirmOutcome::Confirmed { tickets } = &outcome {
            info!(payment_id, reservation_id = %bill.reservation_id, tickets = tickets.len(), "Payment confirmed");
        }
        Ok(outcome)
    }

    async fn settle(&self, uow: &mut dyn UnitOfWork, reservation_id: Uuid, payment_id: &str) -> CoreResult<ConfirmOutcome> {
        // Reservation before bill: the same order the sweeper's cascade delete takes.
        let mut reservation = uow
            .lock_reservation(reservation_id)
            .await?
            .ok_or_else(|| CoreError::Integrity(format!("reservation {} for bill {} is gone", reservation_id, payment_id)))?;
        let mut bill = uow
            .lock_bill(payment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("bill {}", payment_id)))?;

        if bill.is_paid() {
            return Ok(ConfirmOutcome::AlreadyPaid);
        }
        let hold = reservation
            .hold
            .clone()
            .ok_or_else(|| CoreError::Integrity(format!("reservation {} has no hold to book", reservation_id)))?;

        let order_id = reservation.id.to_string();
        let keys = reservation.inventory_keys();
        self.inventory_call(
            "book",
            self.inventory
                .book(&reservation.event_key, &reservation.workspace_key, &hold.hold_token, &keys, &order_id),
        )
        .await?;

        bill.mark_paid(Utc::now())?;
        reservation.mark_paid();
        uow.update_bill(&bill).await?;
        uow.update_reservation(&reservation).await?;
        let tickets = FulfillmentService::issue_tickets(uow, &reservation).await?;
        Ok(ConfirmOutcome::Confirmed { tickets })
    }

    // ========================================================================
    // CancelReservation
    // ========================================================================

    /// Cancel line items by ticket number. All numbers must exist.
    pub async fn cancel_reservation(&self, ticket_numbers: &[i64]) -> CoreResult<CancelOutcome> {
        if ticket_numbers.is_empty() {
            return Err(CoreError::Validation("no ticket numbers given".to_string()));
        }
        let mut numbers = ticket_numbers.to_vec();
        numbers.sort_unstable();
        numbers.dedup();

        let mut uow = self.store.begin().await?;
        let result = self.cancel_in(uow.as_mut(), &numbers).await;
        let outcome = finish(uow, result).await?;

        info!(
            tickets = outcome.canceled_tickets.len(),
            pending_actions = outcome.pending_manual_actions.len(),
            "Reservation line items canceled"
        );
        Ok(outcome)
    }

    async fn cancel_in(&self, uow: &mut dyn UnitOfWork, numbers: &[i64]) -> CoreResult<CancelOutcome> {
        let records = uow.lock_tickets(numbers).await?;
        let found: HashSet<i64> = records.iter().map(|r| r.ticket.number).collect();
        let missing: Vec<i64> = numbers.iter().copied().filter(|n| !found.contains(n)).collect();
        if !missing.is_empty() {
            return Err(CoreError::PartialNotFound { missing });
        }

        let mut per_reservation: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
        for record in &records {
            per_reservation
                .entry(record.reservation_id)
                .or_default()
                .push(record.ticket.line_item_id);
        }

        let mut reservations = Vec::with_capacity(per_reservation.len());
        let mut releases = Vec::new();
        for (reservation_id, line_item_ids) in per_reservation {
            let mut reservation = uow
                .lock_reservation(reservation_id)
                .await?
                .ok_or_else(|| CoreError::Integrity(format!("tickets reference missing reservation {}", reservation_id)))?;
            let keys = ChangeHandler::cancel_items(&mut reservation, &line_item_ids);
            releases.push((reservation.event_key.clone(), reservation.workspace_key.clone(), keys));
            reservations.push(reservation);
        }

        let groups = ChangeHandler::group_by_event(releases);
        for group in &groups {
            self.inventory_call(
                "change status",
                self.inventory
                    .change_status(&group.event_key, &group.workspace_key, &group.object_keys, STATUS_FREE),
            )
            .await?;
        }

        let mut pending_manual_actions = Vec::new();
        for reservation in &reservations {
            uow.update_reservation(reservation).await?;

            let Some(mut bill) = uow.lock_bill_for_reservation(reservation.id).await? else {
                continue;
            };
            if !bill.status.can_transition_to(PaymentStatus::Canceled) {
                continue;
            }
            self.cancel_with_provider(&mut bill).await;
            bill.transition(PaymentStatus::Canceled)?;
            uow.update_bill(&bill).await?;
            if bill.pending_action.is_some() {
                pending_manual_actions.push(PendingManualAction::from_bill(&bill));
            }
        }

        Ok(CancelOutcome {
            canceled_tickets: numbers.to_vec(),
            released: groups.into_iter().map(|g| (g.event_key, g.object_keys)).collect(),
            pending_manual_actions,
        })
    }

    /// Best effort: a provider that cannot cancel leaves an operator follow-up on the bill.
    async fn cancel_with_provider(&self, bill: &mut Bill) {
        let result = match self.registry.get_gateway(bill.provider) {
            Ok(gateway) => self.payment_call("cancel payment", gateway.cancel_payment(&bill.payment_id)).await,
            Err(e) => Err(e),
        };
        if let Err(err) = result {
            let reason = err.to_string();
            warn!(
                payment_id = %bill.payment_id,
                provider = %bill.provider,
                reason = %reason,
                "Provider-side cancellation needs manual action"
            );
            bill.record_pending_action(PendingAction::Cancel, &reason);
        }
    }

    // ========================================================================
    // Provider callbacks and status polling
    // ========================================================================

    pub async fn handle_provider_callback(&self, payment_id: &str, status: CallbackStatus) -> CoreResult<PaymentStatusView> {
        match status.payment_status() {
            Some(PaymentStatus::Paid) => {
                self.confirm_payment(payment_id, Confirmation::ProviderVerified).await?;
            }
            Some(next) => self.apply_status(payment_id, next).await?,
            None => info!(payment_id, ?status, "Callback does not settle the bill"),
        }
        self.payment_status(payment_id).await
    }

    /// Ask the provider for the payment's status and reconcile the bill.
    pub async fn sync_payment_status(&self, payment_id: &str) -> CoreResult<PaymentStatusView> {
        let bill = self
            .store
            .get_bill(payment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("bill {}", payment_id)))?;
        let gateway = self.registry.get_gateway(bill.provider)?;

        match self.payment_call("get status", gateway.get_status(payment_id)).await {
            Ok(report) if report.status == bill.status => {}
            Ok(report) if report.status == PaymentStatus::Paid => {
                self.confirm_payment(payment_id, Confirmation::ProviderVerified).await?;
            }
            Ok(report) if matches!(report.status, PaymentStatus::Failed | PaymentStatus::Canceled) => {
                self.apply_status(payment_id, report.status).await?;
            }
            Ok(_) => {}
            Err(CoreError::Unsupported(_)) => debug!(payment_id, "Provider has no status query, using local status"),
            Err(e) => return Err(e),
        }
        self.payment_status(payment_id).await
    }

    /// Move a bill forward to `next`. Out-of-order notices that would move it
    /// backwards are logged and ignored.
    async fn apply_status(&self, payment_id: &str, next: PaymentStatus) -> CoreResult<()> {
        let mut uow = self.store.begin().await?;
        let result = async {
            let mut bill = uow
                .lock_bill(payment_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("bill {}", payment_id)))?;
            if bill.status == next {
                return Ok(());
            }
            if !bill.status.can_transition_to(next) {
                warn!(payment_id, from = %bill.status, to = %next, "Ignoring backward payment status");
                return Ok(());
            }
            bill.transition(next)?;
            uow.update_bill(&bill).await?;
            info!(payment_id, status = %next, "Bill status updated");
            Ok::<_, CoreError>(())
        }
        .await;
        finish(uow, result).await
    }

    async fn payment_status(&self, payment_id: &str) -> CoreResult<PaymentStatusView> {
        self.store
            .get_bill(payment_id)
            .await?
            .map(|bill| PaymentStatusView::from(&bill))
            .ok_or_else(|| CoreError::NotFound(format!("bill {}", payment_id)))
    }

    // ========================================================================
    // Administrative bill operations
    // ========================================================================

    /// Cancel an unpaid bill at the provider, then locally.
    pub async fn cancel_bill(&self, payment_id: &str) -> CoreResult<PaymentStatusView> {
        let bill = self
            .store
            .get_bill(payment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("bill {}", payment_id)))?;
        if bill.is_paid() || !bill.status.can_transition_to(PaymentStatus::Canceled) {
            return Err(CoreError::Conflict(format!("bill {} is {} and cannot be canceled", payment_id, bill.status)));
        }

        let gateway = self.registry.get_gateway(bill.provider)?;
        self.payment_call("cancel payment", gateway.cancel_payment(payment_id)).await?;

        let mut uow = self.store.begin().await?;
        let result = async {
            let mut bill = uow
                .lock_bill(payment_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("bill {}", payment_id)))?;
            bill.transition(PaymentStatus::Canceled)?;
            uow.update_bill(&bill).await?;
            Ok::<_, CoreError>(PaymentStatusView::from(&bill))
        }
        .await;
        let view = finish(uow, result).await?;
        info!(payment_id, "Bill canceled");
        Ok(view)
    }

    /// Refund a paid bill, in full unless `amount` is given.
    pub async fn refund_bill(&self, payment_id: &str, amount: Option<i64>) -> CoreResult<PaymentStatusView> {
        let bill = self
            .store
            .get_bill(payment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("bill {}", payment_id)))?;
        if !bill.is_paid() {
            return Err(CoreError::Conflict(format!("bill {} is {} and cannot be refunded", payment_id, bill.status)));
        }
        let amount = amount.unwrap_or(bill.amount);
        if amount <= 0 || amount > bill.amount {
            return Err(CoreError::Validation(format!(
                "refund amount {} must be between 1 and {}",
                amount, bill.amount
            )));
        }

        let gateway = self.registry.get_gateway(bill.provider)?;
        self.payment_call("refund payment", gateway.refund_payment(payment_id, amount))
            .await?;

        let mut uow = self.store.begin().await?;
        let result = async {
            let mut bill = uow
                .lock_bill(payment_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("bill {}", payment_id)))?;
            bill.transition(PaymentStatus::Refunded)?;
            if let Some(map) = bill.metadata.as_object_mut() {
                map.insert("refunded_amount".to_string(), serde_json::Value::from(amount));
            }
            uow.update_bill(&bill).await?;
            Ok::<_, CoreError>(PaymentStatusView::from(&bill))
        }
        .await;
        let view = finish(uow, result).await?;
        info!(payment_id, amount, "Bill refunded");
        Ok(view)
    }

    pub async fn pending_manual_actions(&self) -> CoreResult<Vec<PendingManualAction>> {
        let bills = self.store.pending_manual_actions().await?;
        Ok(bills.iter().map(PendingManualAction::from_bill).collect())
    }

    pub fn available_payment_methods(&self) -> Vec<PaymentMethod> {
        self.registry.available_gateways()
    }

    // ========================================================================
    // Tickets and reads
    // ========================================================================

    /// Admit a ticket holder. A ticket is used at most once.
    pub async fn mark_ticket_used(&self, number: i64) -> CoreResult<Ticket> {
        let mut uow = self.store.begin().await?;
        let result = async {
            let mut record = uow
                .lock_tickets(&[number])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| CoreError::NotFound(format!("ticket {}", number)))?;
            let reservation = uow
                .lock_reservation(record.reservation_id)
                .await?
                .ok_or_else(|| CoreError::Integrity(format!("ticket {} has no reservation", number)))?;
            let canceled = reservation
                .line_items
                .iter()
                .any(|item| item.id == record.ticket.line_item_id && item.canceled);
            if canceled {
                return Err(CoreError::Conflict(format!("ticket {} was canceled", number)));
            }
            record.ticket.mark_used()?;
            uow.update_ticket(&record.ticket).await?;
            Ok::<_, CoreError>(record.ticket)
        }
        .await;
        let ticket = finish(uow, result).await?;
        info!(ticket = number, "Ticket used");
        Ok(ticket)
    }

    /// Reservation view for its owner, or for staff.
    pub async fn get_reservation(&self, id: Uuid, requester: &Requester) -> CoreResult<ReservationView> {
        let reservation = self
            .store
            .get_reservation(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("reservation {}", id)))?;
        if reservation.user_id.is_some() && reservation.user_id != requester.user_id && !requester.is_staff() {
            return Err(CoreError::NotFound(format!("reservation {}", id)));
        }
        self.view_of(&reservation).await
    }

    /// Staff page through every reservation, anyone else through their own.
    pub async fn list_reservations(&self, requester: &Requester, page: PageRequest) -> CoreResult<Page<ReservationView>> {
        let Some(owner) = Self::listing_scope(requester) else {
            return Ok(Page::empty(page));
        };
        let listing = self.store.list_reservations(owner, page.window()).await?;
        let mut views = Vec::with_capacity(listing.items.len());
        for reservation in &listing.items {
            views.push(self.view_of(reservation).await?);
        }
        Ok(Page::new(views, page, listing.total))
    }

    /// Ticket by number, visible to the reservation owner and to staff.
    pub async fn get_ticket(&self, number: i64, requester: &Requester) -> CoreResult<TicketView> {
        let not_found = || CoreError::NotFound(format!("ticket {}", number));
        let record = self.store.get_ticket(number).await?.ok_or_else(not_found)?;
        let reservation = self
            .store
            .get_reservation(record.reservation_id)
            .await?
            .ok_or_else(|| CoreError::Integrity(format!("ticket {} has no reservation", number)))?;
        if !requester.is_staff() && (reservation.user_id.is_none() || reservation.user_id != requester.user_id) {
            return Err(not_found());
        }
        Ok(TicketView::build(&record.ticket, &reservation))
    }

    /// Staff page through every ticket, anyone else through tickets of their own reservations.
    pub async fn list_tickets(&self, requester: &Requester, page: PageRequest) -> CoreResult<Page<TicketView>> {
        let Some(owner) = Self::listing_scope(requester) else {
            return Ok(Page::empty(page));
        };
        let listing = self.store.list_tickets(owner, page.window()).await?;
        let mut reservations: BTreeMap<Uuid, Reservation> = BTreeMap::new();
        let mut views = Vec::with_capacity(listing.items.len());
        for record in &listing.items {
            if !reservations.contains_key(&record.reservation_id) {
                let reservation = self.store.get_reservation(record.reservation_id).await?.ok_or_else(|| {
                    CoreError::Integrity(format!("ticket {} has no reservation", record.ticket.number))
                })?;
                reservations.insert(reservation.id, reservation);
            }
            if let Some(reservation) = reservations.get(&record.reservation_id) {
                views.push(TicketView::build(&record.ticket, reservation));
            }
        }
        Ok(Page::new(views, page, listing.total))
    }

    /// `Some(None)` lists everything, `Some(Some(user))` one user's rows, `None` nothing.
    fn listing_scope(requester: &Requester) -> Option<Option<Uuid>> {
        if requester.is_staff() {
            Some(None)
        } else {
            requester.user_id.map(Some)
        }
    }

    async fn view(&self, id: Uuid) -> CoreResult<ReservationView> {
        let reservation = self
            .store
            .get_reservation(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("reservation {}", id)))?;
        self.view_of(&reservation).await
    }

    async fn view_of(&self, reservation: &Reservation) -> CoreResult<ReservationView> {
        let id = reservation.id;
        let bill = self.store.get_bill_for_reservation(id).await?;
        let tickets = self.store.tickets_for_reservation(id).await?;
        Ok(ReservationView::build(reservation, bill.as_ref().map(BillView::from), &tickets, Utc::now()))
    }

    // ========================================================================
    // External call guards
    // ========================================================================

    async fn inventory_call<T>(&self, action: &str, call: impl Future<Output = CoreResult<T>>) -> CoreResult<T> {
        match tokio::time::timeout(self.settings.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(action, "Seat inventory call timed out");
                Err(CoreError::ExternalService(format!("seat inventory {} timed out", action)))
            }
        }
    }

    async fn payment_call<T>(&self, action: &str, call: impl Future<Output = CoreResult<T>>) -> CoreResult<T> {
        match tokio::time::timeout(self.settings.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(action, "Payment provider call timed out");
                Err(CoreError::ProviderUnreachable(format!("payment provider {} timed out", action)))
            }
        }
    }
}

fn validate_selection(cmd: &CreateReservation) -> CoreResult<()> {
    if cmd.objects.is_empty() {
        return Err(CoreError::Validation("select at least one seat or table".to_string()));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = cmd.objects.iter().find(|k| !seen.insert(k.as_str())) {
        return Err(CoreError::Validation(format!("{} selected twice", duplicate)));
    }
    if cmd.discount < 0 {
        return Err(CoreError::Validation("discount cannot be negative".to_string()));
    }
    if cmd.full_name.trim().is_empty() || cmd.phone_number.trim().is_empty() {
        return Err(CoreError::Validation("customer name and phone are required".to_string()));
    }
    Ok(())
}

/// Commit on success, roll back on error.
pub(crate) async fn finish<T>(uow: Box<dyn UnitOfWork>, result: CoreResult<T>) -> CoreResult<T> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}
