use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        order::{self, Entity as OrderEntity, Model as OrderModel},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
        user::{self, Entity as UserEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::inventory::InventoryService,
    services::payments::SignatureVerifier,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Gateway,
    CashOnDelivery,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Processing,
    Confirmed,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
    Returned,
}

impl DeliveryStatus {
    /// Allowed `(from, to)` pairs: the fulfillment pipeline moves forward
    /// one step at a time, any pre-delivery state can be cancelled, and a
    /// delivered order can come back as returned. Anything else needs an
    /// explicit override.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Processing, Confirmed)
                | (Confirmed, Shipped)
                | (Shipped, OutForDelivery)
                | (OutForDelivery, Delivered)
                | (Processing, Cancelled)
                | (Confirmed, Cancelled)
                | (Shipped, Cancelled)
                | (OutForDelivery, Cancelled)
                | (Delivered, Returned)
        )
    }
}

/// One line item as submitted by the caller. All descriptive fields are
/// snapshots frozen into the order; they are never re-read from the product.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    #[validate(length(min = 1))]
    pub name: String,
    pub image: String,
    pub unit_price: Decimal,
    pub size: String,
    pub color: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddressInput {
    #[validate(length(min = 1))]
    pub full_name: String,
    #[validate(length(min = 1))]
    pub phone: String,
    #[validate(length(min = 1))]
    pub street: String,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub state: String,
    #[validate(length(min = 1))]
    pub postal_code: String,
    #[validate(length(min = 1))]
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PricingInput {
    pub items_price: Decimal,
    pub shipping_price: Decimal,
    pub tax_price: Decimal,
    pub discount: Decimal,
    pub total_price: Decimal,
}

/// Order payload shared by both placement paths.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PlaceOrderRequest {
    #[validate]
    pub items: Vec<OrderItemInput>,
    #[validate]
    pub shipping_address: ShippingAddressInput,
    pub pricing: PricingInput,
}

/// Gateway identifiers returned to the client after it completed payment
/// out-of-band, plus the signature proving the gateway produced them.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct GatewayPaymentProof {
    #[validate(length(min = 1))]
    pub gateway_order_id: String,
    #[validate(length(min = 1))]
    pub gateway_payment_id: String,
    #[validate(length(min = 1))]
    pub gateway_signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateDeliveryStatusRequest {
    pub status: DeliveryStatus,
    /// Bypasses the allowed-transition table (explicit administrative
    /// override, e.g. rolling a mistaken `delivered` back to `shipped`).
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub image: String,
    pub unit_price: Decimal,
    pub size: String,
    pub color: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderItemResponse>,
    pub shipping_address: ShippingAddressInput,
    pub pricing: PricingInput,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub delivery_status: DeliveryStatus,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Validates the pricing breakdown: every component non-negative and
/// `items + shipping + tax - discount == total`.
pub fn validate_pricing(pricing: &PricingInput) -> Result<(), ServiceError> {
    let components = [
        ("items_price", pricing.items_price),
        ("shipping_price", pricing.shipping_price),
        ("tax_price", pricing.tax_price),
        ("discount", pricing.discount),
        ("total_price", pricing.total_price),
    ];
    for (name, value) in components {
        if value < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "{name} must be non-negative, got {value}"
            )));
        }
    }

    let expected =
        pricing.items_price + pricing.shipping_price + pricing.tax_price - pricing.discount;
    if expected != pricing.total_price {
        return Err(ServiceError::ValidationError(format!(
            "total_price {} does not match items + shipping + tax - discount = {expected}",
            pricing.total_price
        )));
    }
    Ok(())
}

/// Orchestrates order placement for the gateway-payment and
/// cash-on-delivery paths, plus the read and admin surfaces.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    verifier: SignatureVerifier,
    inventory: InventoryService,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        verifier: SignatureVerifier,
        inventory: InventoryService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            verifier,
            inventory,
            event_sender,
        }
    }

    /// Path A: verify the gateway signature, then persist the order as paid.
    ///
    /// Verification happens before any write; a mismatch rejects the whole
    /// operation and leaves no local trace.
    #[instrument(skip(self, proof, request), fields(user_id = %user_id, gateway_order_id = %proof.gateway_order_id))]
    pub async fn place_gateway_order(
        &self,
        user_id: Uuid,
        proof: GatewayPaymentProof,
        request: PlaceOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        proof.validate()?;
        self.validate_payload(&request)?;

        if !self.verifier.verify(
            &proof.gateway_order_id,
            &proof.gateway_payment_id,
            &proof.gateway_signature,
        ) {
            warn!(
                gateway_order_id = %proof.gateway_order_id,
                "Payment signature verification failed"
            );
            if let Some(event_sender) = &self.event_sender {
                let _ = event_sender
                    .send(Event::PaymentVerificationRejected {
                        gateway_order_id: proof.gateway_order_id.clone(),
                    })
                    .await;
            }
            return Err(ServiceError::PaymentVerificationFailed);
        }

        let response = self
            .create_order(user_id, request, PaymentMethod::Gateway, Some(&proof))
            .await?;

        if let Some(event_sender) = &self.event_sender {
            let _ = event_sender
                .send(Event::PaymentVerified {
                    order_id: response.id,
                    gateway_payment_id: proof.gateway_payment_id.clone(),
                })
                .await;
        }

        Ok(response)
    }

    /// Path B: persist an unpaid order to be settled on delivery.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn place_cash_on_delivery_order(
        &self,
        user_id: Uuid,
        request: PlaceOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        self.validate_payload(&request)?;
        self.create_order(user_id, request, PaymentMethod::CashOnDelivery, None)
            .await
    }

    fn validate_payload(&self, request: &PlaceOrderRequest) -> Result<(), ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::EmptyOrder);
        }
        request.validate()?;
        validate_pricing(&request.pricing)
    }

    /// Creates the order record, its line items, the purchaser's history
    /// entry, and all stock decrements in one transaction: they commit
    /// together or not at all.
    async fn create_order(
        &self,
        user_id: Uuid,
        request: PlaceOrderRequest,
        method: PaymentMethod,
        proof: Option<&GatewayPaymentProof>,
    ) -> Result<OrderResponse, ServiceError> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let paid = proof.is_some();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start order placement transaction");
            ServiceError::DatabaseError(e)
        })?;

        let address = &request.shipping_address;
        let order_active_model = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            items_price: Set(request.pricing.items_price),
            shipping_price: Set(request.pricing.shipping_price),
            tax_price: Set(request.pricing.tax_price),
            discount: Set(request.pricing.discount),
            total_price: Set(request.pricing.total_price),
            payment_method: Set(method.to_string()),
            payment_status: Set(if paid {
                PaymentStatus::Paid.to_string()
            } else {
                PaymentStatus::Pending.to_string()
            }),
            gateway_order_id: Set(proof.map(|p| p.gateway_order_id.clone())),
            gateway_payment_id: Set(proof.map(|p| p.gateway_payment_id.clone())),
            gateway_signature: Set(proof.map(|p| p.gateway_signature.clone())),
            is_paid: Set(paid),
            paid_at: Set(paid.then_some(now)),
            delivery_status: Set(DeliveryStatus::Processing.to_string()),
            is_delivered: Set(false),
            delivered_at: Set(None),
            ship_full_name: Set(address.full_name.clone()),
            ship_phone: Set(address.phone.clone()),
            ship_street: Set(address.street.clone()),
            ship_city: Set(address.city.clone()),
            ship_state: Set(address.state.clone()),
            ship_postal_code: Set(address.postal_code.clone()),
            ship_country: Set(address.country.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let order_model = order_active_model.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order");
            ServiceError::DatabaseError(e)
        })?;

        let mut item_models = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let item_model = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                name: Set(item.name.clone()),
                image: Set(item.image.clone()),
                unit_price: Set(item.unit_price),
                size: Set(item.size.clone()),
                color: Set(item.color.clone()),
                quantity: Set(item.quantity),
                created_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to create order line item");
                ServiceError::DatabaseError(e)
            })?;
            item_models.push(item_model);
        }

        self.append_order_history(&txn, user_id, order_id).await?;

        for item in &request.items {
            self.inventory
                .adjust_stock(&txn, item.product_id, -item.quantity)
                .await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order placement");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, user_id = %user_id, method = %method, "Order placed");

        if let Some(event_sender) = &self.event_sender {
            let _ = event_sender.send(Event::OrderCreated(order_id)).await;
        }

        self.model_to_response(order_model, item_models)
    }

    /// Appends the order id to the purchaser's append-only history within
    /// the caller's transaction.
    ///
    /// The append is a single UPDATE with a JSON-append expression, not a
    /// read-modify-write, so two concurrent placements for the same user
    /// cannot overwrite each other's entry (same treatment the stock
    /// counter gets).
    async fn append_order_history(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let append_expr = match txn.get_database_backend() {
            DatabaseBackend::Postgres => Expr::cust_with_values(
                r#""order_history" || jsonb_build_array(CAST(? AS text))"#,
                [order_id.to_string()],
            ),
            _ => Expr::cust_with_values(
                r#"json_insert("order_history", '$[#]', ?)"#,
                [order_id.to_string()],
            ),
        };

        let result = UserEntity::update_many()
            .col_expr(user::Column::OrderHistory, append_expr)
            .col_expr(user::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(user::Column::Id.eq(user_id))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("User {user_id} not found")));
        }

        Ok(())
    }

    /// Fetches one order, enforcing that the caller is the owner or an
    /// administrator.
    #[instrument(skip(self), fields(order_id = %order_id, caller = %caller_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        caller_id: Uuid,
        caller_is_admin: bool,
    ) -> Result<OrderResponse, ServiceError> {
        let order_model = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if order_model.user_id != caller_id && !caller_is_admin {
            return Err(ServiceError::Forbidden(
                "order belongs to another user".to_string(),
            ));
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        self.model_to_response(order_model, items)
    }

    /// Lists the caller's orders, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_my_orders(&self, user_id: Uuid) -> Result<Vec<OrderResponse>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        self.with_items(orders).await
    }

    /// Admin view: all orders, optionally filtered by delivery status,
    /// paginated newest first.
    #[instrument(skip(self))]
    pub async fn list_all_orders(
        &self,
        status: Option<DeliveryStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::DeliveryStatus.eq(status.to_string()));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        let orders = self.with_items(orders).await?;

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Admin transition of the fulfillment lifecycle. Disallowed `(from,
    /// to)` pairs are rejected unless `force` is set; that includes
    /// re-sending the current status, which under `force` is an idempotent
    /// no-op update. Entering `delivered` stamps the delivered flag and
    /// timestamp the first time only.
    #[instrument(skip(self, request), fields(order_id = %order_id, new_status = %request.status))]
    pub async fn update_delivery_status(
        &self,
        order_id: Uuid,
        request: UpdateDeliveryStatusRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let order_model = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let current: DeliveryStatus = order_model.delivery_status.parse().map_err(|_| {
            ServiceError::InternalError(format!(
                "order {order_id} has unknown delivery status {}",
                order_model.delivery_status
            ))
        })?;

        let allowed = current != request.status && current.can_transition_to(request.status);
        if !allowed && !request.force {
            let reason = if current == request.status {
                format!("order is already {current} (set force to re-apply)")
            } else {
                format!(
                    "{current} -> {} is not an allowed transition (set force to override)",
                    request.status
                )
            };
            return Err(ServiceError::InvalidStatus(reason));
        }

        let old_status = order_model.delivery_status.clone();
        let total_price = order_model.total_price;
        let already_delivered = order_model.is_delivered;
        let now = Utc::now();

        let mut order_active_model: order::ActiveModel = order_model.into();
        order_active_model.delivery_status = Set(request.status.to_string());
        order_active_model.updated_at = Set(Some(now));
        if request.status == DeliveryStatus::Delivered && !already_delivered {
            order_active_model.is_delivered = Set(true);
            order_active_model.delivered_at = Set(Some(now));
        }

        let updated = order_active_model.update(&*self.db).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to update delivery status");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            order_id = %order_id,
            old_status = %old_status,
            new_status = %request.status,
            forced = request.force,
            "Delivery status updated"
        );

        if let Some(event_sender) = &self.event_sender {
            let _ = event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status: request.status.to_string(),
                })
                .await;
            if request.status == DeliveryStatus::Delivered && !already_delivered {
                let _ = event_sender
                    .send(Event::OrderDelivered {
                        order_id,
                        total_price,
                    })
                    .await;
            }
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        self.model_to_response(updated, items)
    }

    async fn with_items(
        &self,
        orders: Vec<OrderModel>,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut all_items: Vec<OrderItemModel> = if ids.is_empty() {
            Vec::new()
        } else {
            OrderItemEntity::find()
                .filter(order_item::Column::OrderId.is_in(ids))
                .all(&*self.db)
                .await?
        };

        let mut responses = Vec::with_capacity(orders.len());
        for order_model in orders {
            let (mine, rest): (Vec<_>, Vec<_>) = all_items
                .into_iter()
                .partition(|item| item.order_id == order_model.id);
            all_items = rest;
            responses.push(self.model_to_response(order_model, mine)?);
        }
        Ok(responses)
    }

    fn model_to_response(
        &self,
        model: OrderModel,
        items: Vec<OrderItemModel>,
    ) -> Result<OrderResponse, ServiceError> {
        let parse = |field: &str, value: &str| {
            ServiceError::InternalError(format!("order {} has unknown {field} {value}", model.id))
        };

        let payment_method: PaymentMethod = model
            .payment_method
            .parse()
            .map_err(|_| parse("payment method", &model.payment_method))?;
        let payment_status: PaymentStatus = model
            .payment_status
            .parse()
            .map_err(|_| parse("payment status", &model.payment_status))?;
        let delivery_status: DeliveryStatus = model
            .delivery_status
            .parse()
            .map_err(|_| parse("delivery status", &model.delivery_status))?;

        Ok(OrderResponse {
            id: model.id,
            user_id: model.user_id,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    id: item.id,
                    product_id: item.product_id,
                    name: item.name,
                    image: item.image,
                    unit_price: item.unit_price,
                    size: item.size,
                    color: item.color,
                    quantity: item.quantity,
                })
                .collect(),
            shipping_address: ShippingAddressInput {
                full_name: model.ship_full_name,
                phone: model.ship_phone,
                street: model.ship_street,
                city: model.ship_city,
                state: model.ship_state,
                postal_code: model.ship_postal_code,
                country: model.ship_country,
            },
            pricing: PricingInput {
                items_price: model.items_price,
                shipping_price: model.shipping_price,
                tax_price: model.tax_price,
                discount: model.discount,
                total_price: model.total_price,
            },
            payment_method,
            payment_status,
            gateway_order_id: model.gateway_order_id,
            gateway_payment_id: model.gateway_payment_id,
            is_paid: model.is_paid,
            paid_at: model.paid_at,
            delivery_status,
            is_delivered: model.is_delivered,
            delivered_at: model.delivered_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
