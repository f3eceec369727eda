use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Order & Payment API

Order placement and payment verification for an e-commerce storefront.

## Flow

1. `POST /api/v1/payments/intent` mints a payment intent at the external
   gateway; the client completes payment with the gateway's SDK.
2. `POST /api/v1/orders` submits the cart together with the gateway's
   order id, payment id, and signature. The signature is verified
   server-side before the order is persisted as paid.
3. `POST /api/v1/orders/cod` places a cash-on-delivery order without a
   payment step.

## Authentication

All endpoints require a JWT bearer token:

```
Authorization: Bearer <your-jwt-token>
```

Administrative endpoints additionally require the `admin` role.
        "#
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order placement and lifecycle"),
        (name = "Payments", description = "Payment intent creation")
    ),
    paths(
        crate::handlers::payments::create_payment_intent,
        crate::handlers::orders::place_gateway_order,
        crate::handlers::orders::place_cod_order,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_all_orders,
        crate::handlers::orders::update_delivery_status,
    ),
    components(
        schemas(
            crate::handlers::payments::CreatePaymentIntentRequest,
            crate::handlers::payments::PaymentIntentResponse,
            crate::handlers::orders::PlaceGatewayOrderRequest,
            crate::services::payments::PaymentIntent,
            crate::services::orders::PlaceOrderRequest,
            crate::services::orders::OrderItemInput,
            crate::services::orders::ShippingAddressInput,
            crate::services::orders::PricingInput,
            crate::services::orders::GatewayPaymentProof,
            crate::services::orders::UpdateDeliveryStatusRequest,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::OrderListResponse,
            crate::services::orders::DeliveryStatus,
            crate::services::orders::PaymentStatus,
            crate::services::orders::PaymentMethod,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
