use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_USER_IDS: &[&str] =
    &["user-seller-merkato-001", "user-seller-dairy-001", "user-buyer-abebe-001"];

const SEED_PRODUCT_IDS: &[&str] =
    &["prod-tomato-001", "prod-onion-001", "prod-avocado-001", "prod-milk-001"];

const SEED_SNIPPET_IDS: &[&str] =
    &["kb-tomato-storage-001", "kb-tomato-storage-002", "kb-milk-fresh-001", "kb-delivery-001"];

/// Deterministic demo dataset: suppliers, a buyer, a small catalog, price
/// history for the pricing engine, and a starter knowledge base.
pub struct SeedDataset;

#[derive(Debug)]
pub struct SeedResult {
    pub users: usize,
    pub products: usize,
    pub snippets: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub checks: Vec<(&'static str, bool)>,
}

impl VerificationResult {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|(_, ok)| *ok)
    }
}

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/seed_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            users: SEED_USER_IDS.len(),
            products: SEED_PRODUCT_IDS.len(),
            snippets: SEED_SNIPPET_IDS.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (label, table, ids) in [
            ("users", "users", SEED_USER_IDS),
            ("products", "products", SEED_PRODUCT_IDS),
            ("knowledge-snippets", "knowledge_snippets", SEED_SNIPPET_IDS),
        ] {
            let quoted = sql_array_from_ids(ids);
            let count: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(1) FROM {table} WHERE id IN {quoted}"
            ))
            .fetch_one(pool)
            .await?;
            checks.push((label, count == ids.len() as i64));
        }

        let observation_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM price_observations").fetch_one(pool).await?;
        checks.push(("price-observations", observation_count >= 5));

        Ok(VerificationResult { checks })
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted: Vec<String> = ids.iter().map(|id| format!("'{id}'")).collect();
    format!("({})", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use kcart_core::domain::product::ProductId;

    use super::SeedDataset;
    use crate::connect_with_settings;
    use crate::migrations::run_pending;
    use crate::repositories::{ProductRepository, SqlProductRepository};

    #[tokio::test]
    async fn seed_loads_and_verifies_against_fresh_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let result = SeedDataset::load(&pool).await.expect("load seed");
        assert_eq!(result.products, 4);

        let verification = SeedDataset::verify(&pool).await.expect("verify seed");
        assert!(verification.passed(), "failed checks: {:?}", verification.checks);
    }

    #[tokio::test]
    async fn seeded_catalog_is_queryable_through_the_repository() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        SeedDataset::load(&pool).await.expect("load seed");

        let repo = SqlProductRepository::new(pool);
        let tomato = repo
            .find_by_id(&ProductId("prod-tomato-001".to_string()))
            .await
            .expect("query")
            .expect("tomato exists");

        assert_eq!(tomato.unit_price, Decimal::from(55));
        assert_eq!(tomato.local_name.as_deref(), Some("ቲማቲም"));
    }
}
