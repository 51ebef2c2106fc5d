use boxoffice_core::models::Reservation;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Inventory to hand back for one event after a cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseGroup {
    pub event_key: String,
    pub workspace_key: String,
    pub object_keys: Vec<String>,
}

/// Line-item cancellation rules.
pub struct ChangeHandler;

impl ChangeHandler {
    /// Cancel line items (flag, never delete) and return the seat-map keys that
    /// no longer back any active line item of the reservation.
    pub fn cancel_items(reservation: &mut Reservation, line_item_ids: &[Uuid]) -> Vec<String> {
        let canceled = reservation.cancel_line_items(line_item_ids);

        let mut released: Vec<String> = Vec::new();
        for item in reservation.line_items.iter().filter(|i| canceled.contains(&i.id)) {
            // A table stays held while any of its slots is still active.
            let still_active = reservation
                .line_items
                .iter()
                .any(|other| !other.canceled && other.object_key == item.object_key);
            if !still_active && !released.contains(&item.object_key) {
                released.push(item.object_key.clone());
            }
        }
        released
    }

    /// Merge released keys per (event, workspace) so each event gets one call.
    pub fn group_by_event(releases: impl IntoIterator<Item = (String, String, Vec<String>)>) -> Vec<ReleaseGroup> {
        let mut groups: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        for (event_key, workspace_key, keys) in releases {
            let entry = groups.entry((event_key, workspace_key)).or_default();
            for key in keys {
                if !entry.contains(&key) {
                    entry.push(key);
                }
            }
        }
        groups
            .into_iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|((event_key, workspace_key), object_keys)| ReleaseGroup {
                event_key,
                workspace_key,
                object_keys,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::models::{Category, EventConfig, LineItem, ObjectType};

    fn reservation(items: &[(&str, &str, ObjectType)]) -> Reservation {
        let category = Category { id: Uuid::new_v4(), name: "Floor".into(), price: 10 };
        let event = EventConfig {
            id: Uuid::new_v4(),
            name: "Gala".into(),
            event_key: "evt".into(),
            workspace_key: "ws".into(),
            categories: vec![category.clone()],
        };
        let mut r = Reservation::new(&event, None, "Sara".into(), "0750".into(), 0);
        for (key, name, object_type) in items {
            r.add_line_item(LineItem::new(r.id, *key, *name, &category, *object_type));
        }
        r
    }

    #[test]
    fn test_cancel_seat_releases_its_key() {
        let mut r = reservation(&[("S1", "S1", ObjectType::Seat), ("S2", "S2", ObjectType::Seat)]);
        let first = r.line_items[0].id;

        let released = ChangeHandler::cancel_items(&mut r, &[first]);
        assert_eq!(released, vec!["S1".to_string()]);
        assert_eq!(r.total_price, 10);
        assert!(r.line_items[0].canceled);
    }

    #[test]
    fn test_table_released_only_when_all_slots_canceled() {
        let mut r = reservation(&[("T1", "T1-1", ObjectType::Table), ("T1", "T1-2", ObjectType::Table)]);
        let (slot1, slot2) = (r.line_items[0].id, r.line_items[1].id);

        assert!(ChangeHandler::cancel_items(&mut r, &[slot1]).is_empty());
        assert_eq!(ChangeHandler::cancel_items(&mut r, &[slot2]), vec!["T1".to_string()]);
        assert_eq!(r.total_price, 0);
    }

    #[test]
    fn test_group_by_event_merges_and_drops_empty() {
        let groups = ChangeHandler::group_by_event(vec![
            ("evt-b".to_string(), "ws".to_string(), vec!["B1".to_string()]),
            ("evt-a".to_string(), "ws".to_string(), vec!["A1".to_string()]),
            ("evt-a".to_string(), "ws".to_string(), vec!["A2".to_string(), "A1".to_string()]),
            ("evt-c".to_string(), "ws".to_string(), vec![]),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].event_key, "evt-a");
        assert_eq!(groups[0].object_keys, vec!["A1".to_string(), "A2".to_string()]);
        assert_eq!(groups[1].object_keys, vec!["B1".to_string()]);
    }
}
