use async_trait::async_trait;
use boxoffice_core::models::{PaymentProvider, PaymentStatus};
use boxoffice_core::payment::{CallbackStatus, PaymentGateway, PaymentIntent, PaymentRequest, PaymentStatusReport};
use boxoffice_core::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, warn};

/// Connection settings for the Amwal (PayTabs Iraq) card gateway.
#[derive(Debug, Clone)]
pub struct AmwalSettings {
    pub server_key: String,
    pub profile_id: i64,
    pub base_url: String,
    pub callback_url: String,
    pub return_url: String,
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SignatureError {
    #[error("gateway has no server key")]
    NotConfigured,
    #[error("signature is not valid hex")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Serialize)]
struct CreatePaymentBody<'a> {
    profile_id: i64,
    tran_type: &'a str,
    tran_class: &'a str,
    cart_id: String,
    cart_description: &'a str,
    cart_currency: &'a str,
    cart_amount: i64,
    callback: &'a str,
    #[serde(rename = "return")]
    return_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
    tran_ref: Option<String>,
    redirect_url: Option<String>,
    cart_id: Option<String>,
    trace: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    profile_id: i64,
    tran_ref: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    cart_amount: Option<serde_json::Value>,
    payment_result: Option<PaymentResult>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentResult {
    response_status: String,
    transaction_time: Option<String>,
}

pub struct AmwalGateway {
    settings: AmwalSettings,
    http: reqwest::Client,
}

impl AmwalGateway {
    pub fn new(settings: AmwalSettings) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| CoreError::ProviderUnavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { settings, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    /// Check the `signature` header of a callback: hex HMAC-SHA256 of the raw
    /// body keyed with the server key.
    pub fn verify_callback_signature(&self, payload: &[u8], signature: &str) -> Result<(), SignatureError> {
        verify_signature(&self.settings.server_key, payload, signature)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> CoreResult<R> {
        let response = self
            .http
            .post(self.endpoint(path))
            .header("authorization", &self.settings.server_key)
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnreachable(format!("amwal {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("amwal {} returned {}: {}", path, status, text);
            return Err(classify_status(status, message));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| CoreError::ProviderUnreachable(format!("amwal {} response unreadable: {}", path, e)))
    }
}

/// Server-side and throttling failures are transient; other rejections are final.
fn classify_status(status: reqwest::StatusCode, message: String) -> CoreError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        CoreError::ProviderUnreachable(message)
    } else {
        CoreError::Payment(message)
    }
}

fn verify_signature(key: &str, payload: &[u8], signature: &str) -> Result<(), SignatureError> {
    if key.is_empty() {
        return Err(SignatureError::NotConfigured);
    }
    let expected = hex::decode(signature.trim()).map_err(|_| SignatureError::Malformed)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).map_err(|_| SignatureError::NotConfigured)?;
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

fn parse_amount(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        serde_json::Value::String(s) => s.parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for AmwalGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Amwal
    }

    fn display_name(&self) -> &str {
        "Amwal"
    }

    fn description(&self) -> &str {
        "Visa, MasterCard and local cards"
    }

    fn is_enabled(&self) -> bool {
        !self.settings.server_key.is_empty() && self.settings.profile_id > 0
    }

    async fn create_payment(&self, request: &PaymentRequest) -> CoreResult<PaymentIntent> {
        let body = CreatePaymentBody {
            profile_id: self.settings.profile_id,
            tran_type: "sale",
            tran_class: "ecom",
            cart_id: request.reservation_id.to_string(),
            cart_description: &request.description,
            cart_currency: &request.currency,
            cart_amount: request.amount,
            callback: &self.settings.callback_url,
            return_url: &self.settings.return_url,
        };

        let response: CreatePaymentResponse = self.post("payment/request", &body).await?;
        let Some(tran_ref) = response.tran_ref else {
            let message = response.message.unwrap_or_else(|| "no transaction reference".to_string());
            warn!(reservation_id = %request.reservation_id, "Amwal rejected payment request: {}", message);
            return Err(CoreError::Payment(message));
        };

        info!(reservation_id = %request.reservation_id, tran_ref = %tran_ref, "Amwal payment created");
        Ok(PaymentIntent {
            payment_id: tran_ref,
            redirect_url: response.redirect_url,
            metadata: serde_json::json!({
                "cart_id": response.cart_id.unwrap_or_else(|| request.reservation_id.to_string()),
                "trace": response.trace,
                "merchant_id": self.settings.profile_id,
            }),
        })
    }

    async fn confirm_payment(&self, payment_id: &str, _secret: Option<&str>) -> CoreResult<()> {
        let report = self.get_status(payment_id).await?;
        if report.status != PaymentStatus::Paid {
            return Err(CoreError::Payment(format!("payment {} is {}", payment_id, report.status)));
        }
        Ok(())
    }

    async fn get_status(&self, payment_id: &str) -> CoreResult<PaymentStatusReport> {
        let body = QueryBody {
            profile_id: self.settings.profile_id,
            tran_ref: payment_id,
        };
        let response: QueryResponse = self.post("payment/query", &body).await?;
        let Some(result) = response.payment_result else {
            let message = response.message.unwrap_or_else(|| "no payment result".to_string());
            return Err(CoreError::Payment(format!("payment {}: {}", payment_id, message)));
        };

        let status = CallbackStatus::from_code(&result.response_status)
            .payment_status()
            .unwrap_or(PaymentStatus::NotPaid);
        Ok(PaymentStatusReport {
            status,
            amount: parse_amount(response.cart_amount.as_ref()),
            paid_at: if status == PaymentStatus::Paid {
                result
                    .transaction_time
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc))
            } else {
                None
            },
        })
    }

    async fn cancel_payment(&self, payment_id: &str) -> CoreResult<()> {
        Err(CoreError::Unsupported(format!(
            "amwal payment {} must be canceled through the merchant dashboard",
            payment_id
        )))
    }

    async fn refund_payment(&self, payment_id: &str, _amount: i64) -> CoreResult<()> {
        Err(CoreError::Unsupported(format!(
            "amwal payment {} must be refunded through the merchant dashboard",
            payment_id
        )))
    }
}
