use async_trait::async_trait;
use boxoffice_shared::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PaymentProvider, PaymentStatus};
use crate::CoreResult;

/// Everything a provider needs to open a payment for a reservation.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRequest {
    pub reservation_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub customer_name: Masked<String>,
    pub customer_phone: Masked<String>,
    pub description: String,
}

/// Provider's answer to `create_payment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub payment_id: String,
    pub redirect_url: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusReport {
    pub status: PaymentStatus,
    pub amount: Option<i64>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Outcome code carried by a provider callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallbackStatus {
    Approved,
    Declined,
    Error,
    Voided,
    Pending,
    Unknown,
}

impl CallbackStatus {
    /// Map a provider response code (`A`, `D`, `E`, `V`, `P`, `H`).
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "A" | "APPROVED" => CallbackStatus::Approved,
            "D" | "DECLINED" => CallbackStatus::Declined,
            "E" | "ERROR" => CallbackStatus::Error,
            "V" | "VOIDED" => CallbackStatus::Voided,
            "P" | "H" | "PENDING" | "ON HOLD" => CallbackStatus::Pending,
            _ => CallbackStatus::Unknown,
        }
    }

    /// Bill status this outcome maps to, if it settles anything.
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        match self {
            CallbackStatus::Approved => Some(PaymentStatus::Paid),
            CallbackStatus::Declined | CallbackStatus::Error => Some(PaymentStatus::Failed),
            CallbackStatus::Voided => Some(PaymentStatus::Canceled),
            CallbackStatus::Pending | CallbackStatus::Unknown => None,
        }
    }
}

/// A payment backend. Every provider implements the same capability set;
/// operations a provider cannot perform return `CoreError::Unsupported`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Human-readable name shown in the payment-method picker.
    fn display_name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn is_enabled(&self) -> bool;

    async fn create_payment(&self, request: &PaymentRequest) -> CoreResult<PaymentIntent>;

    /// Succeeds only when the provider considers the payment settled.
    async fn confirm_payment(&self, payment_id: &str, secret: Option<&str>) -> CoreResult<()>;

    async fn get_status(&self, payment_id: &str) -> CoreResult<PaymentStatusReport>;

    async fn cancel_payment(&self, payment_id: &str) -> CoreResult<()>;

    async fn refund_payment(&self, payment_id: &str, amount: i64) -> CoreResult<()>;
}
