use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::error;

use crate::error::{PipelineError, Result};

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

// Free-form annotations attached to a gateway order at creation time. The
// gateway echoes them back on webhook deliveries, which makes them a useful
// but untrusted side channel: webhook processing must tolerate their absence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNotes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateGatewayOrder {
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: OrderNotes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

impl GatewayPayment {
    pub fn is_settled(&self) -> bool {
        matches!(self.status.as_str(), "captured" | "authorized")
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, order: &CreateGatewayOrder) -> Result<GatewayOrder>;

    // The authoritative payment state. Client-declared status is never
    // trusted; reconciliation always re-reads it from here.
    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment>;
}

pub struct HttpPaymentGateway {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .map_err(|err| {
                PipelineError::Configuration(format!("failed to build gateway client: {err}"))
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_order(&self, order: &CreateGatewayOrder) -> Result<GatewayOrder> {
        let response = self
            .http
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(order)
            .send()
            .await
            .map_err(upstream)?;

        read_json(response).await
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment> {
        let response = self
            .http
            .get(format!("{}/v1/payments/{payment_id}", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(upstream)?;

        read_json(response).await
    }
}

// Provider error bodies are logged here and never forwarded to callers.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(%status, body = %body, "payment gateway returned an error");
        return Err(PipelineError::Upstream(anyhow::anyhow!(
            "gateway responded with status {status}"
        )));
    }

    response.json::<T>().await.map_err(upstream)
}

fn upstream(err: reqwest::Error) -> PipelineError {
    error!(error = %err, "payment gateway request failed");
    PipelineError::Upstream(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_states_are_captured_and_authorized() {
        for (status, settled) in [
            ("captured", true),
            ("authorized", true),
            ("created", false),
            ("failed", false),
            ("refunded", false),
        ] {
            let payment = GatewayPayment {
                id: "pay_1".to_string(),
                order_id: None,
                amount: 1000,
                currency: "USD".to_string(),
                status: status.to_string(),
            };
            assert_eq!(payment.is_settled(), settled, "status {status}");
        }
    }

    #[test]
    fn empty_notes_are_omitted_from_the_wire_format() {
        let order = CreateGatewayOrder {
            amount: 29900,
            currency: "USD".to_string(),
            receipt: "course_123".to_string(),
            notes: OrderNotes::default(),
        };
        let encoded = serde_json::to_value(&order).unwrap();
        assert_eq!(encoded["notes"], serde_json::json!({}));
    }
}
