use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use boxoffice_core::models::{Requester, Ticket};
use boxoffice_order::models::{CancelOutcome, Page, PageRequest, TicketView};
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::auth::require_staff;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CancelTicketsRequest {
    pub ticket_numbers: Vec<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/tickets", get(list_tickets))
        .route("/v1/tickets/cancel", post(cancel_tickets))
        .route("/v1/tickets/{number}", get(get_ticket))
        .route("/v1/tickets/{number}/use", post(use_ticket))
}

/// POST /v1/tickets/cancel
pub async fn cancel_tickets(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Json(req): Json<CancelTicketsRequest>,
) -> Result<Json<CancelOutcome>, AppError> {
    require_staff(&requester)?;
    let outcome = state.coordinator.cancel_reservation(&req.ticket_numbers).await?;
    if !outcome.pending_manual_actions.is_empty() {
        tracing::warn!(
            count = outcome.pending_manual_actions.len(),
            "Cancellation left bills awaiting manual provider action"
        );
    }
    Ok(Json(outcome))
}

/// POST /v1/tickets/{number}/use
pub async fn use_ticket(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(number): Path<i64>,
) -> Result<Json<Ticket>, AppError> {
    require_staff(&requester)?;
    Ok(Json(state.coordinator.mark_ticket_used(number).await?))
}

/// GET /v1/tickets?page=&per_page=
pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Page<TicketView>>, AppError> {
    Ok(Json(state.coordinator.list_tickets(&requester, page).await?))
}

/// GET /v1/tickets/{number}
pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(number): Path<i64>,
) -> Result<Json<TicketView>, AppError> {
    Ok(Json(state.coordinator.get_ticket(number, &requester).await?))
}
