use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use skillforge_core::{CheckoutBinding, CheckoutStore, LedgerStore, PaymentUpsert, to_major_units};

use crate::error::{PipelineError, Result};
use crate::gateway::PaymentGateway;
use crate::notify::{Notifier, PurchaseNote};
use crate::signature::{SignatureKind, SignatureVerifier};
use crate::webhook::{GatewayEvent, PAYMENT_CAPTURED};

pub const PAYMENT_COMPLETED: &str = "COMPLETED";
const UNKNOWN_USER: &str = "unknown";

#[derive(Debug, Clone)]
pub struct ClientConfirmation {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedPurchase {
    pub course_id: Uuid,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookReceipt {
    pub applied: bool,
}

// Single owner of the "verified confirmation -> durable state" step. The
// client-callback route and the webhook route are thin entry points into the
// same idempotent apply, so the two paths can race or duplicate freely
// without double-applying side effects.
pub struct Reconciler {
    verifier: SignatureVerifier,
    checkout: Arc<dyn CheckoutStore>,
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
}

impl Reconciler {
    pub fn new(
        verifier: SignatureVerifier,
        checkout: Arc<dyn CheckoutStore>,
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            verifier,
            checkout,
            ledger,
            gateway,
            notifier,
        }
    }

    pub async fn confirm(&self, confirmation: &ClientConfirmation) -> Result<ConfirmedPurchase> {
        let payload = SignatureVerifier::confirmation_payload(
            &confirmation.order_id,
            &confirmation.payment_id,
        );
        if !self.verifier.verify(
            SignatureKind::ClientConfirmation,
            payload.as_bytes(),
            &confirmation.signature,
        ) {
            return Err(PipelineError::Signature);
        }

        // Atomic remove-and-return: of any number of concurrent confirmations
        // for this order, exactly one sees the binding. A miss means replay
        // after consumption, or an order we never issued.
        let binding = self
            .checkout
            .take(&confirmation.order_id)
            .await?
            .ok_or(PipelineError::MetadataMissing)?;

        let payment = match self.gateway.fetch_payment(&confirmation.payment_id).await {
            Ok(payment) => payment,
            Err(err) => {
                self.restore_binding(&confirmation.order_id, &binding).await;
                return Err(err);
            }
        };
        if !payment.is_settled() {
            self.restore_binding(&confirmation.order_id, &binding).await;
            return Err(PipelineError::NotCaptured(payment.status));
        }

        let upsert = PaymentUpsert {
            user_id: binding.user_id.clone(),
            course_id: Some(binding.course_id),
            amount: to_major_units(payment.amount, &payment.currency)?,
            currency: payment.currency.to_ascii_uppercase(),
            status: PAYMENT_COMPLETED.to_string(),
            gateway_order_id: Some(confirmation.order_id.clone()),
            gateway_payment_id: payment.id,
        };
        self.apply(&upsert, binding.user_email.as_deref()).await?;

        Ok(ConfirmedPurchase {
            course_id: binding.course_id,
            user_id: binding.user_id,
        })
    }

    pub async fn ingest_webhook(&self, raw_body: &[u8], signature: &str) -> Result<WebhookReceipt> {
        // Verify against the delivered bytes, then parse. Parsing first would
        // mean re-serializing for verification, which is not byte-stable.
        if !self
            .verifier
            .verify(SignatureKind::Webhook, raw_body, signature)
        {
            return Err(PipelineError::Signature);
        }

        let event: GatewayEvent = serde_json::from_slice(raw_body)
            .map_err(|err| PipelineError::Validation(format!("malformed webhook payload: {err}")))?;

        if event.event != PAYMENT_CAPTURED {
            info!(event = %event.event, "ignoring unhandled webhook event");
            return Ok(WebhookReceipt { applied: false });
        }

        let payment = event.payload.payment.entity;

        // Notes are an untrusted, optional side channel. Fall back to the
        // checkout binding when they are missing, then to placeholders:
        // a partially-known payment still gets recorded rather than bouncing
        // the delivery into an endless retry loop.
        let binding = match payment.order_id.as_deref() {
            Some(order_id) => match self.checkout.get(order_id).await {
                Ok(binding) => binding,
                Err(err) => {
                    warn!(error = %err, order_id = %order_id, "checkout binding lookup failed");
                    None
                }
            },
            None => None,
        };

        let course_id = payment
            .notes
            .course_id
            .as_deref()
            .and_then(|value| Uuid::parse_str(value).ok())
            .or_else(|| binding.as_ref().map(|binding| binding.course_id));
        let user_id = payment
            .notes
            .user_id
            .clone()
            .or_else(|| binding.as_ref().map(|binding| binding.user_id.clone()))
            .unwrap_or_else(|| UNKNOWN_USER.to_string());

        let upsert = PaymentUpsert {
            user_id,
            course_id,
            amount: to_major_units(payment.amount, &payment.currency)?,
            currency: payment.currency.to_ascii_uppercase(),
            status: PAYMENT_COMPLETED.to_string(),
            gateway_order_id: payment.order_id,
            gateway_payment_id: payment.id,
        };
        let user_email = binding.and_then(|binding| binding.user_email);
        self.apply(&upsert, user_email.as_deref()).await?;

        Ok(WebhookReceipt { applied: true })
    }

    // The idempotent apply both entry points converge on. Storage enforces
    // one payment record per gateway payment id and one enrollment per
    // (user, course); the enrollment insert outcome gates the notification so
    // it fires exactly once per reconciled payment.
    async fn apply(&self, payment: &PaymentUpsert, user_email: Option<&str>) -> Result<()> {
        self.ledger.upsert_payment(payment).await?;

        let Some(course_id) = payment.course_id else {
            warn!(
                payment_id = %payment.gateway_payment_id,
                "payment recorded without a resolvable course, skipping enrollment"
            );
            return Ok(());
        };
        if payment.user_id == UNKNOWN_USER {
            warn!(
                payment_id = %payment.gateway_payment_id,
                "payment recorded without a resolvable user, skipping enrollment"
            );
            return Ok(());
        }

        let created = self
            .ledger
            .enroll_if_absent(&payment.user_id, course_id)
            .await?;
        if created {
            let note = PurchaseNote {
                user_id: payment.user_id.clone(),
                user_email: user_email.map(str::to_string),
                course_id,
                course_title: None,
                amount: payment.amount,
                currency: payment.currency.clone(),
                payment_id: payment.gateway_payment_id.clone(),
            };
            if let Err(err) = self.notifier.payment_confirmed(&note).await {
                error!(
                    error = %err,
                    payment_id = %payment.gateway_payment_id,
                    "failed to send purchase confirmation"
                );
            }
        }

        Ok(())
    }

    async fn restore_binding(&self, order_id: &str, binding: &CheckoutBinding) {
        if let Err(err) = self.checkout.put(order_id, binding).await {
            error!(error = %err, order_id = %order_id, "failed to restore checkout binding");
        }
    }
}
