use boxoffice_core::models::{Reservation, Ticket};
use boxoffice_core::repository::UnitOfWork;
use boxoffice_core::CoreResult;
use tracing::debug;

/// Issues admission tickets for paid reservations.
pub struct FulfillmentService;

impl FulfillmentService {
    /// Issue one ticket per active line item that does not have one yet.
    /// Running it again for the same reservation issues nothing.
    pub async fn issue_tickets(uow: &mut dyn UnitOfWork, reservation: &Reservation) -> CoreResult<Vec<Ticket>> {
        let existing = uow.tickets_for_reservation(reservation.id).await?;

        let mut issued = Vec::new();
        for item in reservation.line_items.iter().filter(|i| !i.canceled) {
            if existing.iter().any(|t| t.line_item_id == item.id) {
                continue;
            }
            let ticket = uow
                .issue_ticket(item.id, &item.seating_label(), &item.category_name)
                .await?;
            debug!(reservation_id = %reservation.id, ticket = ticket.number, "Ticket issued");
            issued.push(ticket);
        }
        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::models::{Category, EventConfig, LineItem, ObjectType};
    use boxoffice_core::repository::ReservationStore;
    use boxoffice_store::InMemoryReservationStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_issue_tickets_once_per_line_item() {
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
        reservation.add_line_item(LineItem::new(reservation.id, "T1", "T1-1", &category, ObjectType::Table));

        let store = InMemoryReservationStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.insert_reservation(&reservation).await.unwrap();

        let first = FulfillmentService::issue_tickets(uow.as_mut(), &reservation).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].seating_label, "T1-1, table");
        assert_eq!(first[0].category_label, "VIP");

        let second = FulfillmentService::issue_tickets(uow.as_mut(), &reservation).await.unwrap();
        assert!(second.is_empty());
        uow.commit().await.unwrap();

        assert_eq!(store.ticket_count().await, 2);
    }
}
