use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use kcart_core::domain::price::{PriceObservation, PriceSource};
use kcart_core::domain::product::ProductId;

use super::{
    parse_decimal, parse_optional_decimal, parse_timestamp, PriceObservationRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlPriceObservationRepository {
    pool: DbPool,
}

impl SqlPriceObservationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PriceObservationRepository for SqlPriceObservationRepository {
    async fn record(&self, observation: PriceObservation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO price_observations (product_id, source, price, quantity, observed_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&observation.product_id.0)
        .bind(observation.source.as_str())
        .bind(observation.price.to_string())
        .bind(observation.quantity.map(|value| value.to_string()))
        .bind(observation.observed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_product(
        &self,
        product_id: &ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT product_id, source, price, quantity, observed_at
             FROM price_observations
             WHERE product_id = ? AND observed_at >= ?
             ORDER BY observed_at ASC",
        )
        .bind(&product_id.0)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(observation_from_row).collect()
    }
}

fn observation_from_row(row: SqliteRow) -> Result<PriceObservation, RepositoryError> {
    let source_raw = row.try_get::<String, _>("source")?;
    let source = PriceSource::parse(&source_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown price source `{source_raw}`")))?;

    Ok(PriceObservation {
        product_id: ProductId(row.try_get("product_id")?),
        source,
        price: parse_decimal("price", row.try_get("price")?)?,
        quantity: parse_optional_decimal("quantity", row.try_get("quantity")?)?,
        observed_at: parse_timestamp("observed_at", row.try_get("observed_at")?)?,
    })
}
