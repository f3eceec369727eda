use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Applies signed stock deltas to products.
///
/// The adjustment is a single conditional `UPDATE` (not a read-modify-write
/// in two round trips), so concurrent orders for the same product cannot
/// lose decrements, and stock can never go negative.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Applies `stock_quantity += delta` for the given product. `delta` is
    /// negative for a sale. Runs on `conn` so callers can pass their own
    /// transaction and have the adjustment commit or roll back with it.
    #[instrument(skip(self, conn), fields(product_id = %product_id, delta))]
    pub async fn adjust_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        delta: i32,
    ) -> Result<(), ServiceError> {
        if delta == 0 {
            return Ok(());
        }

        let mut update = ProductEntity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).add(delta),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id));

        if delta < 0 {
            // Guard in the WHERE clause keeps the counter non-negative even
            // under concurrent decrements.
            update = update.filter(product::Column::StockQuantity.gte(-delta));
        }

        let result = update.exec(conn).await?;

        if result.rows_affected == 0 {
            // Distinguish a missing product from an insufficient counter.
            let exists = ProductEntity::find_by_id(product_id).one(conn).await?;
            return match exists {
                None => Err(ServiceError::NotFound(format!(
                    "Product {product_id} not found"
                ))),
                Some(p) => Err(ServiceError::InsufficientStock(format!(
                    "product {product_id} has {} in stock, requested {}",
                    p.stock_quantity, -delta
                ))),
            };
        }

        info!(product_id = %product_id, delta, "Stock adjusted");

        if let Some(event_sender) = &self.event_sender {
            let _ = event_sender
                .send(Event::StockAdjusted { product_id, delta })
                .await;
        }

        Ok(())
    }

    /// Current stock counter for a product.
    pub async fn get_stock(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        let product = ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {product_id} not found")))?;
        Ok(product.stock_quantity)
    }
}
