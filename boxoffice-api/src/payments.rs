use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use boxoffice_core::models::Requester;
use boxoffice_order::models::{Confirmation, ConfirmOutcome, PaymentStatusView, PendingManualAction};
use boxoffice_order::registry::PaymentMethod;
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::auth::require_admin;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    pub bill_id: String,
    pub secret_key: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    /// Defaults to the full bill amount.
    #[serde(default)]
    pub amount: Option<i64>,
}

/// Routes reachable without a bearer token.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/methods", get(list_methods))
        .route("/v1/payments/status/{payment_id}", get(payment_status))
        .route("/v1/payments/pay", post(pay))
}

/// Admin routes; mounted behind `require_auth`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/cancel/{payment_id}", post(cancel_bill))
        .route("/v1/payments/refund/{payment_id}", post(refund_bill))
        .route("/v1/admin/payments/pending-actions", get(pending_actions))
}

pub async fn list_methods(State(state): State<AppState>) -> Json<Vec<PaymentMethod>> {
    Json(state.coordinator.available_payment_methods())
}

/// GET /v1/payments/status/{payment_id}
pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentStatusView>, AppError> {
    let view = state.coordinator.sync_payment_status(&payment_id).await?;
    Ok(Json(view))
}

/// POST /v1/payments/pay
/// Settles a bill from a trusted internal caller holding the shared secret.
pub async fn pay(
    State(state): State<AppState>,
    Json(req): Json<PayRequest>,
) -> Result<Json<ConfirmOutcome>, AppError> {
    let outcome = state
        .coordinator
        .confirm_payment(&req.bill_id, Confirmation::SharedSecret(req.secret_key))
        .await?;
    Ok(Json(outcome))
}

pub async fn cancel_bill(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentStatusView>, AppError> {
    require_admin(&requester)?;
    let view = state.coordinator.cancel_bill(&payment_id).await?;
    Ok(Json(view))
}

pub async fn refund_bill(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(payment_id): Path<String>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<PaymentStatusView>, AppError> {
    require_admin(&requester)?;
    let view = state.coordinator.refund_bill(&payment_id, req.amount).await?;
    Ok(Json(view))
}

pub async fn pending_actions(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<PendingManualAction>>, AppError> {
    require_admin(&requester)?;
    Ok(Json(state.coordinator.pending_manual_actions().await?))
}
