use async_trait::async_trait;
use boxoffice_core::models::PaymentProvider;
use boxoffice_core::payment::{PaymentGateway, PaymentIntent, PaymentRequest, PaymentStatusReport};
use boxoffice_core::{CoreError, CoreResult};
use uuid::Uuid;

/// Payment collected at the counter. There is no remote party: the caller of
/// `confirm_payment` has already been authenticated by the coordinator.
pub struct CashGateway {
    enabled: bool,
}

impl CashGateway {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl PaymentGateway for CashGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Cash
    }

    fn display_name(&self) -> &str {
        "Cash"
    }

    fn description(&self) -> &str {
        "Pay at a point of sale"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn create_payment(&self, request: &PaymentRequest) -> CoreResult<PaymentIntent> {
        Ok(PaymentIntent {
            payment_id: format!("cash-{}", Uuid::new_v4().simple()),
            redirect_url: None,
            metadata: serde_json::json!({
                "cart_id": request.reservation_id,
                "currency": request.currency,
            }),
        })
    }

    async fn confirm_payment(&self, _payment_id: &str, _secret: Option<&str>) -> CoreResult<()> {
        Ok(())
    }

    async fn get_status(&self, payment_id: &str) -> CoreResult<PaymentStatusReport> {
        Err(CoreError::Unsupported(format!("cash payment {} has no remote status", payment_id)))
    }

    async fn cancel_payment(&self, payment_id: &str) -> CoreResult<()> {
        tracing::info!(payment_id = %payment_id, "Cash payment canceled locally");
        Ok(())
    }

    async fn refund_payment(&self, payment_id: &str, amount: i64) -> CoreResult<()> {
        tracing::info!(payment_id = %payment_id, amount, "Cash refund to be paid out at the counter");
        Ok(())
    }
}
