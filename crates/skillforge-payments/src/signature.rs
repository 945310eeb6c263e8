//! HMAC-SHA256 signature verification for payment confirmations.
//!
//! Two distinct secrets are in play: the gateway key secret signs the
//! client-side confirmation string `"{order_id}|{payment_id}"`, and the
//! webhook secret signs the raw webhook body bytes exactly as delivered.
//! Webhook payloads must never be re-serialized before verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PipelineError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    ClientConfirmation,
    Webhook,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    key_secret: String,
    webhook_secret: String,
}

impl SignatureVerifier {
    pub fn new(
        key_secret: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let key_secret = key_secret.into();
        let webhook_secret = webhook_secret.into();

        if key_secret.is_empty() {
            return Err(PipelineError::Configuration(
                "gateway key secret is empty".to_string(),
            ));
        }
        if webhook_secret.is_empty() {
            return Err(PipelineError::Configuration(
                "webhook signing secret is empty".to_string(),
            ));
        }

        Ok(Self {
            key_secret,
            webhook_secret,
        })
    }

    pub fn confirmation_payload(order_id: &str, payment_id: &str) -> String {
        format!("{order_id}|{payment_id}")
    }

    // Never errors on malformed input: anything that is not a valid hex
    // encoding of the expected MAC simply fails verification.
    pub fn verify(&self, kind: SignatureKind, payload: &[u8], signature: &str) -> bool {
        let Ok(provided) = hex::decode(signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret(kind).as_bytes()) else {
            return false;
        };
        mac.update(payload);
        // verify_slice rejects length mismatches and compares in constant time.
        mac.verify_slice(&provided).is_ok()
    }

    pub fn sign(&self, kind: SignatureKind, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret(kind).as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn secret(&self, kind: SignatureKind) -> &str {
        match kind {
            SignatureKind::ClientConfirmation => &self.key_secret,
            SignatureKind::Webhook => &self.webhook_secret,
        }
    }
}
