use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use boxoffice_core::payment::CallbackStatus;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AmwalCallback {
    pub tran_ref: String,
    pub payment_result: CallbackResult,
}

#[derive(Debug, Deserialize)]
pub struct CallbackResult {
    pub response_status: String,
    #[serde(default)]
    pub transaction_time: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/payments/amwal/callback", post(handle_amwal_callback))
}

/// POST /v1/payments/amwal/callback
/// Always answers 200 so the provider does not keep retrying; failures are logged.
pub async fn handle_amwal_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(signature) = headers.get("signature").and_then(|h| h.to_str().ok()) else {
        tracing::warn!("Amwal callback without signature ignored");
        return StatusCode::OK;
    };
    if let Err(e) = state.amwal.verify_callback_signature(&body, signature) {
        tracing::warn!("Amwal callback rejected: {}", e);
        return StatusCode::OK;
    }

    let payload: AmwalCallback = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Malformed Amwal callback: {}", e);
            return StatusCode::OK;
        }
    };

    let status = CallbackStatus::from_code(&payload.payment_result.response_status);
    tracing::info!(
        tran_ref = %payload.tran_ref,
        status = ?status,
        transaction_time = payload.payment_result.transaction_time.as_deref().unwrap_or("-"),
        "Received Amwal callback"
    );

    match state.coordinator.handle_provider_callback(&payload.tran_ref, status).await {
        Ok(view) => tracing::info!(tran_ref = %view.payment_id, status = ?view.status, "Callback applied"),
        Err(e) => tracing::error!(tran_ref = %payload.tran_ref, "Callback processing failed: {}", e),
    }

    StatusCode::OK
}
