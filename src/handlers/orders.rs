use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::{
        DeliveryStatus, GatewayPaymentProof, OrderListResponse, OrderResponse, PlaceOrderRequest,
        UpdateDeliveryStatusRequest,
    },
    AppState,
};

/// Body for the gateway-payment placement path: the order payload plus the
/// gateway identifiers and signature received after the client-side payment.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PlaceGatewayOrderRequest {
    #[serde(flatten)]
    pub order: PlaceOrderRequest,
    #[serde(flatten)]
    pub payment: GatewayPaymentProof,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    /// Filter by delivery status, e.g. `shipped`.
    pub status: Option<DeliveryStatus>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

/// Place an order paid through the payment gateway.
///
/// The signature is verified before anything is written; a mismatch
/// rejects the request with 400 and leaves no order behind.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = PlaceGatewayOrderRequest,
    responses(
        (status = 201, description = "Order placed and marked paid", body = OrderResponse),
        (status = 400, description = "Invalid payload or failed signature verification"),
        (status = 422, description = "Insufficient stock for a line item")
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip(state, payload), fields(user_id = %auth.user_id))]
pub async fn place_gateway_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<PlaceGatewayOrderRequest>,
) -> Result<(axum::http::StatusCode, Json<OrderResponse>), ServiceError> {
    let order = state
        .order_service
        .place_gateway_order(auth.user_id, payload.payment, payload.order)
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(order)))
}

/// Place a cash-on-delivery order. Persisted unpaid; settled on delivery.
#[utoipa::path(
    post,
    path = "/orders/cod",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed, payment pending", body = OrderResponse),
        (status = 400, description = "Invalid payload"),
        (status = 422, description = "Insufficient stock for a line item")
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip(state, payload), fields(user_id = %auth.user_id))]
pub async fn place_cod_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<(axum::http::StatusCode, Json<OrderResponse>), ServiceError> {
    let order = state
        .order_service
        .place_cash_on_delivery_order(auth.user_id, payload)
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(order)))
}

/// List the authenticated user's own orders, newest first.
#[utoipa::path(
    get,
    path = "/orders/mine",
    responses(
        (status = 200, description = "The caller's orders", body = [OrderResponse])
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn list_my_orders(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<OrderResponse>>, ServiceError> {
    let orders = state.order_service.list_my_orders(auth.user_id).await?;
    Ok(Json(orders))
}

/// Fetch a single order. Owners see their own; admins see any.
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "The order", body = OrderResponse),
        (status = 403, description = "Order belongs to another user"),
        (status = 404, description = "Order not found")
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip(state), fields(order_id = %id, user_id = %auth.user_id))]
pub async fn get_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let order = state
        .order_service
        .get_order(id, auth.user_id, auth.is_admin())
        .await?;
    Ok(Json(order))
}

/// Admin: list all orders, optionally filtered by delivery status.
#[utoipa::path(
    get,
    path = "/orders",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Paginated orders", body = OrderListResponse),
        (status = 403, description = "Caller is not an administrator")
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip(state), fields(user_id = %auth.user_id))]
pub async fn list_all_orders(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    require_admin(&auth)?;
    let orders = state
        .order_service
        .list_all_orders(query.status, query.page, query.per_page)
        .await?;
    Ok(Json(orders))
}

/// Admin: move an order through the fulfillment lifecycle.
#[utoipa::path(
    put,
    path = "/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateDeliveryStatusRequest,
    responses(
        (status = 200, description = "Updated order", body = OrderResponse),
        (status = 400, description = "Disallowed status transition"),
        (status = 403, description = "Caller is not an administrator"),
        (status = 404, description = "Order not found")
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip(state, payload), fields(order_id = %id, user_id = %auth.user_id))]
pub async fn update_delivery_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDeliveryStatusRequest>,
) -> Result<Json<OrderResponse>, ServiceError> {
    require_admin(&auth)?;
    let order = state.order_service.update_delivery_status(id, payload).await?;
    Ok(Json(order))
}

fn require_admin(auth: &AuthUser) -> Result<(), ServiceError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "administrator role required".to_string(),
        ))
    }
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(place_gateway_order).get(list_all_orders))
        .route("/cod", post(place_cod_order))
        .route("/mine", get(list_my_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_delivery_status))
}
