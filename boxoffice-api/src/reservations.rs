use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use boxoffice_core::models::{PaymentProvider, Requester};
use boxoffice_order::models::{CreateReservation, Page, PageRequest, ReservationView};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub objects: Vec<String>,
    pub full_name: String,
    pub phone_number: String,
    #[serde(default)]
    pub discount: i64,
    /// Provider name such as `amwal` or `cash`; the registry's primary when absent.
    pub payment_provider: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/events/{event_id}/reservations", post(create_reservation))
        .route("/v1/reservations", get(list_reservations))
        .route("/v1/reservations/expiring/stream", get(expiring_stream))
        .route("/v1/reservations/{id}", get(get_reservation))
}

/// POST /v1/events/{event_id}/reservations
pub async fn create_reservation(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationView>), AppError> {
    let preferred_provider = req
        .payment_provider
        .as_deref()
        .map(str::parse::<PaymentProvider>)
        .transpose()?;

    let cmd = CreateReservation {
        event_id,
        objects: req.objects,
        full_name: req.full_name,
        phone_number: req.phone_number,
        discount: req.discount,
        preferred_provider,
    };

    let view = state.coordinator.create_reservation(cmd, &requester).await?;
    tracing::info!(reservation_id = %view.id, total = view.total_price, "Reservation created");
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /v1/reservations/{id}
pub async fn get_reservation(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationView>, AppError> {
    let view = state.coordinator.get_reservation(id, &requester).await?;
    Ok(Json(view))
}

/// GET /v1/reservations?page=&per_page=
pub async fn list_reservations(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Page<ReservationView>>, AppError> {
    Ok(Json(state.coordinator.list_reservations(&requester, page).await?))
}

/// GET /v1/reservations/expiring/stream
///
/// Server-sent "about to expire" notices for the caller's own reservations.
/// Admins receive every notice.
pub async fn expiring_stream(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.expiring_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| {
        let requester = requester.clone();
        async move {
            // Lagged receivers skip the missed notices.
            let event = msg.ok()?;
            let visible = requester.is_admin() || requester.user_id.is_some_and(|u| event.is_for(u));
            if !visible {
                return None;
            }
            match Event::default().event("reservation_expiring").json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    tracing::warn!("Failed to encode expiring notice: {}", e);
                    None
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
