use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, instrument, warn};
use utoipa::ToSchema;

use crate::{config::GatewayConfig, errors::ServiceError};

type HmacSha256 = Hmac<Sha256>;

/// Proves that a `(gateway order id, gateway payment id)` pair was produced
/// by the gateway, using the shared secret. Pure; no side effects.
///
/// This is the sole authorization gate distinguishing a legitimate paid
/// order from an unverified one.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(cfg: &GatewayConfig) -> Self {
        Self {
            secret: cfg.key_secret.clone(),
        }
    }

    /// Lowercase-hex HMAC-SHA256 over `orderId + "|" + paymentId`.
    pub fn expected_signature(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        let payload = format!("{gateway_order_id}|{gateway_payment_id}");
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Compares the supplied signature against the expected digest in
    /// constant time.
    pub fn verify(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool {
        let expected = self.expected_signature(gateway_order_id, gateway_payment_id);
        constant_time_eq(&expected, signature)
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// A minted server-side payment intent ("gateway order").
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntent {
    /// Gateway-issued intent id
    pub intent_id: String,
    /// Amount echoed by the gateway, in the smallest currency unit
    pub amount_minor: i64,
    pub currency: String,
    /// Public key identifier the client needs to open the payment UI
    pub key_id: String,
}

#[derive(Debug, Serialize)]
struct GatewayOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GatewayOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

/// Thin call-out to the external payment processor. Mints a payment intent
/// before the user pays; persists nothing locally, so an abandoned intent
/// leaves no trace.
#[derive(Clone)]
pub struct PaymentGatewayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl PaymentGatewayClient {
    pub fn new(cfg: &GatewayConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client init failed: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            key_id: cfg.key_id.clone(),
            key_secret: cfg.key_secret.clone(),
        })
    }

    /// Converts a major-unit amount (e.g. 39.88) to the smallest currency
    /// unit (e.g. 3988). Rejects non-positive amounts before any I/O.
    pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidAmount(format!(
                "amount must be positive, got {amount}"
            )));
        }
        (amount * Decimal::from(100))
            .round_dp(0)
            .to_i64()
            .ok_or_else(|| {
                ServiceError::InvalidAmount(format!("amount {amount} out of range"))
            })
    }

    /// Mints a gateway order for `amount_minor` in the smallest currency
    /// unit. `receipt` is an idempotency-friendly caller-chosen identifier;
    /// `notes` is arbitrary audit metadata (e.g. the initiating user id).
    #[instrument(skip(self, notes), fields(amount_minor, currency))]
    pub async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
        notes: serde_json::Value,
    ) -> Result<PaymentIntent, ServiceError> {
        if amount_minor <= 0 {
            return Err(ServiceError::InvalidAmount(format!(
                "amount must be positive, got {amount_minor}"
            )));
        }

        let url = format!("{}/v1/orders", self.base_url);
        let body = GatewayOrderRequest {
            amount: amount_minor,
            currency,
            receipt,
            notes,
        };

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!("Payment gateway request timed out");
                    ServiceError::GatewayUnavailable("request timed out".to_string())
                } else {
                    error!(error = %e, "Payment gateway request failed");
                    ServiceError::GatewayUnavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            error!(status = %status, "Payment gateway returned an error status");
            return Err(ServiceError::GatewayUnavailable(format!(
                "gateway responded with {status}"
            )));
        }

        let parsed: GatewayOrderResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to decode payment gateway response");
            ServiceError::GatewayUnavailable(format!("malformed gateway response: {e}"))
        })?;

        Ok(PaymentIntent {
            intent_id: parsed.id,
            amount_minor: parsed.amount,
            currency: parsed.currency,
            key_id: self.key_id.clone(),
        })
    }
}
