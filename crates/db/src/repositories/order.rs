use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row};

use kcart_core::domain::order::{Order, OrderId, OrderLine, OrderStatus, PaymentMode};
use kcart_core::domain::product::ProductId;
use kcart_core::domain::user::UserId;

use super::{
    parse_decimal, parse_optional_date, parse_timestamp, OrderRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_lines(
        &self,
        order_ids: &[String],
    ) -> Result<BTreeMap<String, Vec<OrderLine>>, RepositoryError> {
        let mut lines: BTreeMap<String, Vec<OrderLine>> = BTreeMap::new();
        for order_id in order_ids {
            let rows = sqlx::query(
                "SELECT order_id, product_id, quantity, unit_price
                 FROM order_lines
                 WHERE order_id = ?
                 ORDER BY line_no ASC",
            )
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;

            let parsed = rows
                .into_iter()
                .map(line_from_row)
                .collect::<Result<Vec<OrderLine>, RepositoryError>>()?;
            lines.insert(order_id.clone(), parsed);
        }
        Ok(lines)
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<Order>, RepositoryError> {
        let headers =
            rows.into_iter().map(header_from_row).collect::<Result<Vec<_>, RepositoryError>>()?;
        let ids: Vec<String> = headers.iter().map(|header| header.id.0.clone()).collect();
        let mut lines = self.load_lines(&ids).await?;

        Ok(headers
            .into_iter()
            .map(|header| {
                let order_lines = lines.remove(&header.id.0).unwrap_or_default();
                header.into_order(order_lines)
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&select_orders("WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(self.hydrate(vec![row]).await?.into_iter().next())
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO orders (
                id, buyer_id, delivery_date, delivery_location, payment_mode, status, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                delivery_date = excluded.delivery_date,
                delivery_location = excluded.delivery_location,
                payment_mode = excluded.payment_mode,
                status = excluded.status",
        )
        .bind(&order.id.0)
        .bind(&order.buyer_id.0)
        .bind(order.delivery_date.map(|value| value.to_string()))
        .bind(order.delivery_location.as_deref())
        .bind(order.payment_mode.map(|mode| mode.as_str()))
        .bind(order.status.as_str())
        .bind(order.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        // Lines are replaced wholesale; the order aggregate is the unit of
        // persistence.
        sqlx::query("DELETE FROM order_lines WHERE order_id = ?")
            .bind(&order.id.0)
            .execute(&mut *tx)
            .await?;

        for (line_no, line) in order.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_lines (order_id, line_no, product_id, quantity, unit_price)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&order.id.0)
            .bind(line_no as i64)
            .bind(&line.product_id.0)
            .bind(line.quantity.to_string())
            .bind(line.unit_price.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_for_buyer(&self, buyer_id: &UserId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&select_orders("WHERE buyer_id = ? ORDER BY created_at DESC"))
            .bind(&buyer_id.0)
            .fetch_all(&self.pool)
            .await?;

        self.hydrate(rows).await
    }

    async fn list_for_supplier(
        &self,
        supplier_id: &UserId,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&select_orders(
            "WHERE id IN (
                SELECT DISTINCT order_lines.order_id
                FROM order_lines
                JOIN products ON products.id = order_lines.product_id
                WHERE products.supplier_id = ?
             )
             ORDER BY created_at DESC",
        ))
        .bind(&supplier_id.0)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }
}

struct OrderHeader {
    id: OrderId,
    buyer_id: UserId,
    delivery_date: Option<chrono::NaiveDate>,
    delivery_location: Option<String>,
    payment_mode: Option<PaymentMode>,
    status: OrderStatus,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl OrderHeader {
    fn into_order(self, lines: Vec<OrderLine>) -> Order {
        Order {
            id: self.id,
            buyer_id: self.buyer_id,
            lines,
            delivery_date: self.delivery_date,
            delivery_location: self.delivery_location,
            payment_mode: self.payment_mode,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

fn select_orders(suffix: &str) -> String {
    format!(
        "SELECT id, buyer_id, delivery_date, delivery_location, payment_mode, status, created_at
         FROM orders
         {suffix}"
    )
}

fn header_from_row(row: SqliteRow) -> Result<OrderHeader, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = OrderStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown order status `{status_raw}`")))?;

    let payment_mode = row
        .try_get::<Option<String>, _>("payment_mode")?
        .map(|raw| {
            PaymentMode::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown payment mode `{raw}`")))
        })
        .transpose()?;

    Ok(OrderHeader {
        id: OrderId(row.try_get("id")?),
        buyer_id: UserId(row.try_get("buyer_id")?),
        delivery_date: parse_optional_date("delivery_date", row.try_get("delivery_date")?)?,
        delivery_location: row.try_get("delivery_location")?,
        payment_mode,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn line_from_row(row: SqliteRow) -> Result<OrderLine, RepositoryError> {
    Ok(OrderLine {
        product_id: ProductId(row.try_get("product_id")?),
        quantity: parse_decimal("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
    })
}
