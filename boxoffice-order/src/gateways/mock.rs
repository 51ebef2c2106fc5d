use async_trait::async_trait;
use boxoffice_core::models::{PaymentProvider, PaymentStatus};
use boxoffice_core::payment::{PaymentGateway, PaymentIntent, PaymentRequest, PaymentStatusReport};
use boxoffice_core::{CoreError, CoreResult};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    create_error: Option<String>,
    confirm_error: Option<String>,
    status: Option<PaymentStatus>,
    cancel_unsupported: bool,
    created: Vec<PaymentRequest>,
    confirmations: Vec<String>,
    canceled: Vec<String>,
    refunds: Vec<(String, i64)>,
}

/// Scriptable payment provider. Registers under whichever provider id it is
/// given so it can stand in for a real backend.
pub struct MockGateway {
    provider: PaymentProvider,
    enabled: bool,
    /// Latency added before every provider answer.
    delay: Option<Duration>,
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(provider: PaymentProvider) -> Self {
        Self {
            provider,
            enabled: true,
            delay: None,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_create(self, message: &str) -> Self {
        self.state().create_error = Some(message.to_string());
        self
    }

    pub fn without_cancel_support(self) -> Self {
        self.state().cancel_unsupported = true;
        self
    }

    /// Make `confirm_payment` decline until cleared with `None`.
    pub fn set_confirm_error(&self, message: Option<&str>) {
        self.state().confirm_error = message.map(str::to_string);
    }

    /// Status reported by `get_status`.
    pub fn set_status(&self, status: PaymentStatus) {
        self.state().status = Some(status);
    }

    pub fn created_payments(&self) -> Vec<PaymentRequest> {
        self.state().created.clone()
    }

    pub fn confirmations(&self) -> usize {
        self.state().confirmations.len()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.state().canceled.clone()
    }

    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.state().refunds.clone()
    }

    async fn respond(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    fn display_name(&self) -> &str {
        "Mock"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn create_payment(&self, request: &PaymentRequest) -> CoreResult<PaymentIntent> {
        self.respond().await;
        let mut state = self.state();
        if let Some(message) = &state.create_error {
            return Err(CoreError::Payment(message.clone()));
        }
        state.created.push(request.clone());
        let payment_id = format!("mock_{}_{}", self.provider, request.reservation_id.simple());
        Ok(PaymentIntent {
            redirect_url: Some(format!("https://pay.example.test/{}", payment_id)),
            metadata: serde_json::json!({ "cart_id": request.reservation_id }),
            payment_id,
        })
    }

    async fn confirm_payment(&self, payment_id: &str, _secret: Option<&str>) -> CoreResult<()> {
        self.respond().await;
        let mut state = self.state();
        if let Some(message) = &state.confirm_error {
            return Err(CoreError::Payment(message.clone()));
        }
        state.confirmations.push(payment_id.to_string());
        Ok(())
    }

    async fn get_status(&self, _payment_id: &str) -> CoreResult<PaymentStatusReport> {
        self.respond().await;
        let status = self.state().status.unwrap_or(PaymentStatus::NotPaid);
        Ok(PaymentStatusReport {
            status,
            amount: None,
            paid_at: None,
        })
    }

    async fn cancel_payment(&self, payment_id: &str) -> CoreResult<()> {
        self.respond().await;
        let mut state = self.state();
        if state.cancel_unsupported {
            return Err(CoreError::Unsupported("cancellation happens in the merchant dashboard".to_string()));
        }
        state.canceled.push(payment_id.to_string());
        Ok(())
    }

    async fn refund_payment(&self, payment_id: &str, amount: i64) -> CoreResult<()> {
        self.respond().await;
        self.state().refunds.push((payment_id.to_string(), amount));
        Ok(())
    }
}
