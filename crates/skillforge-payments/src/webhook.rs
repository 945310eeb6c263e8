//! Wire format of gateway webhook deliveries.
//!
//! These types are only ever deserialized from the raw request body, and only
//! after the body's signature has been verified against those same bytes.

use serde::Deserialize;

use crate::gateway::OrderNotes;

pub const PAYMENT_CAPTURED: &str = "payment.captured";

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    pub payment: PaymentEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEnvelope {
    pub entity: CapturedPayment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapturedPayment {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: OrderNotes,
}
