use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use kcart_core::domain::product::{Category, Product, ProductId};
use kcart_core::domain::user::UserId;

use super::{
    parse_decimal, parse_optional_date, parse_timestamp, ProductRepository, RepositoryError,
    ReserveOutcome,
};
use crate::DbPool;

const RESERVE_CAS_ATTEMPTS: u32 = 3;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&select_products("WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(product_from_row).transpose()
    }

    async fn search(&self, query: &str) -> Result<Vec<Product>, RepositoryError> {
        let pattern = format!("%{}%", query.trim());
        let rows = sqlx::query(&select_products(
            "WHERE active = 1 AND (name LIKE ? COLLATE NOCASE OR local_name LIKE ?)
             ORDER BY name ASC",
        ))
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn list_by_supplier(
        &self,
        supplier_id: &UserId,
    ) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(&select_products("WHERE supplier_id = ? ORDER BY created_at ASC"))
            .bind(&supplier_id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO products (
                id, name, local_name, category, unit, unit_price, stock,
                expiry_date, supplier_id, image_ref, active, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                local_name = excluded.local_name,
                category = excluded.category,
                unit = excluded.unit,
                unit_price = excluded.unit_price,
                stock = excluded.stock,
                expiry_date = excluded.expiry_date,
                image_ref = excluded.image_ref,
                active = excluded.active",
        )
        .bind(&product.id.0)
        .bind(&product.name)
        .bind(product.local_name.as_deref())
        .bind(product.category.as_str())
        .bind(&product.unit)
        .bind(product.unit_price.to_string())
        .bind(product.stock.to_string())
        .bind(product.expiry_date.map(|value| value.to_string()))
        .bind(&product.supplier_id.0)
        .bind(product.image_ref.as_deref())
        .bind(product.active)
        .bind(product.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reserve_stock(
        &self,
        id: &ProductId,
        quantity: Decimal,
    ) -> Result<ReserveOutcome, RepositoryError> {
        // Stock is stored as an exact decimal string, so the guard is a
        // compare-and-swap on the previously read value rather than a SQL
        // arithmetic predicate. Bounded retry absorbs concurrent writers.
        for _ in 0..RESERVE_CAS_ATTEMPTS {
            let row = sqlx::query("SELECT stock FROM products WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

            let Some(row) = row else {
                return Ok(ReserveOutcome::MissingProduct);
            };

            let current_raw = row.try_get::<String, _>("stock")?;
            let current = parse_decimal("stock", current_raw.clone())?;
            if current < quantity {
                return Ok(ReserveOutcome::Insufficient { available: current });
            }

            let updated = sqlx::query("UPDATE products SET stock = ? WHERE id = ? AND stock = ?")
                .bind((current - quantity).to_string())
                .bind(&id.0)
                .bind(&current_raw)
                .execute(&self.pool)
                .await?;

            if updated.rows_affected() == 1 {
                return Ok(ReserveOutcome::Reserved);
            }
        }

        Err(RepositoryError::Decode(format!(
            "stock reservation for product `{}` kept losing the compare-and-swap",
            id.0
        )))
    }

    async fn release_stock(
        &self,
        id: &ProductId,
        quantity: Decimal,
    ) -> Result<(), RepositoryError> {
        for _ in 0..RESERVE_CAS_ATTEMPTS {
            let row = sqlx::query("SELECT stock FROM products WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

            let Some(row) = row else {
                return Ok(());
            };

            let current_raw = row.try_get::<String, _>("stock")?;
            let current = parse_decimal("stock", current_raw.clone())?;

            let updated = sqlx::query("UPDATE products SET stock = ? WHERE id = ? AND stock = ?")
                .bind((current + quantity).to_string())
                .bind(&id.0)
                .bind(&current_raw)
                .execute(&self.pool)
                .await?;

            if updated.rows_affected() == 1 {
                return Ok(());
            }
        }

        Err(RepositoryError::Decode(format!(
            "stock release for product `{}` kept losing the compare-and-swap",
            id.0
        )))
    }
}

fn select_products(suffix: &str) -> String {
    format!(
        "SELECT id, name, local_name, category, unit, unit_price, stock,
                expiry_date, supplier_id, image_ref, active, created_at
         FROM products
         {suffix}"
    )
}

fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    let category_raw = row.try_get::<String, _>("category")?;
    let category = Category::parse(&category_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown category `{category_raw}`")))?;

    Ok(Product {
        id: ProductId(row.try_get("id")?),
        name: row.try_get("name")?,
        local_name: row.try_get("local_name")?,
        category,
        unit: row.try_get("unit")?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        stock: parse_decimal("stock", row.try_get("stock")?)?,
        expiry_date: parse_optional_date("expiry_date", row.try_get("expiry_date")?)?,
        supplier_id: UserId(row.try_get("supplier_id")?),
        image_ref: row.try_get("image_ref")?,
        active: row.try_get("active")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
