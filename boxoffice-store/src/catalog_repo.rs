use async_trait::async_trait;
use boxoffice_core::models::{Category, EventConfig};
use boxoffice_core::repository::EventCatalog;
use boxoffice_core::CoreResult;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::storage_error;

pub struct PgEventCatalog {
    pool: PgPool,
}

impl PgEventCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    name: String,
    event_key: String,
    workspace_key: String,
}

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: Uuid,
    name: String,
    price: i64,
}

#[async_trait]
impl EventCatalog for PgEventCatalog {
    async fn get_event(&self, event_id: Uuid) -> CoreResult<Option<EventConfig>> {
        let event = sqlx::query_as::<_, EventRow>(
            "SELECT id, name, event_key, workspace_key FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        let Some(event) = event else {
            return Ok(None);
        };

        let categories = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, name, price FROM categories WHERE event_id = $1 ORDER BY name",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(Some(EventConfig {
            id: event.id,
            name: event.name,
            event_key: event.event_key,
            workspace_key: event.workspace_key,
            categories: categories
                .into_iter()
                .map(|c| Category { id: c.id, name: c.name, price: c.price })
                .collect(),
        }))
    }
}
