use axum::{extract::State, routing::post, Json, Router};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::payments::{PaymentGatewayClient, PaymentIntent},
    AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentIntentRequest {
    /// Amount in major units, e.g. 39.88.
    pub amount: Decimal,
    #[validate(length(min = 3, max = 3))]
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "INR".to_string()
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentIntentResponse {
    #[serde(flatten)]
    pub intent: PaymentIntent,
    pub receipt: String,
}

/// Create a payment intent at the gateway for a checkout about to happen.
///
/// The returned intent id is what the storefront hands to the gateway's
/// client-side SDK; the eventual order references it.
#[utoipa::path(
    post,
    path = "/payments/intent",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 200, description = "Payment intent created", body = PaymentIntentResponse),
        (status = 400, description = "Invalid amount"),
        (status = 503, description = "Payment gateway unavailable")
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip(state, payload), fields(user_id = %auth.user_id))]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreatePaymentIntentRequest>,
) -> Result<Json<PaymentIntentResponse>, ServiceError> {
    payload.validate()?;
    let amount_minor = PaymentGatewayClient::to_minor_units(payload.amount)?;

    let receipt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    let receipt = format!("rcpt_{receipt}");

    let notes = serde_json::json!({ "user_id": auth.user_id });
    let intent = state
        .gateway_client
        .create_intent(amount_minor, &payload.currency, &receipt, notes)
        .await?;

    if let Some(event_sender) = &state.event_sender {
        let _ = event_sender
            .send(crate::events::Event::PaymentIntentCreated {
                intent_id: intent.intent_id.clone(),
                amount_minor: intent.amount_minor,
                currency: intent.currency.clone(),
            })
            .await;
    }

    Ok(Json(PaymentIntentResponse { intent, receipt }))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new().route("/intent", post(create_payment_intent))
}
