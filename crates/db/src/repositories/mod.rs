use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use kcart_core::domain::knowledge::{KnowledgeSnippet, SnippetId};
use kcart_core::domain::order::{Order, OrderId};
use kcart_core::domain::price::PriceObservation;
use kcart_core::domain::product::{Product, ProductId};
use kcart_core::domain::user::{User, UserId};

pub mod knowledge;
pub mod memory;
pub mod order;
pub mod price;
pub mod product;
pub mod user;

pub use knowledge::SqlKnowledgeRepository;
pub use memory::{
    InMemoryKnowledgeRepository, InMemoryOrderRepository, InMemoryPriceObservationRepository,
    InMemoryProductRepository, InMemoryUserRepository,
};
pub use order::SqlOrderRepository;
pub use price::SqlPriceObservationRepository;
pub use product::SqlProductRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result of an atomic stock reservation. `Insufficient` carries the stock
/// observed at decision time so callers can report it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    Insufficient { available: Decimal },
    MissingProduct,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError>;
    async fn save(&self, user: User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Case-insensitive substring match over `name` and `local_name`,
    /// restricted to active listings.
    async fn search(&self, query: &str) -> Result<Vec<Product>, RepositoryError>;

    async fn list_by_supplier(&self, supplier_id: &UserId)
        -> Result<Vec<Product>, RepositoryError>;

    async fn save(&self, product: Product) -> Result<(), RepositoryError>;

    /// Atomically decrement stock by `quantity` if enough remains. Two
    /// concurrent reservations for the last unit must not both succeed.
    async fn reserve_stock(
        &self,
        id: &ProductId,
        quantity: Decimal,
    ) -> Result<ReserveOutcome, RepositoryError>;

    /// Return previously reserved stock, used when an order is cancelled.
    async fn release_stock(
        &self,
        id: &ProductId,
        quantity: Decimal,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    async fn save(&self, order: Order) -> Result<(), RepositoryError>;
    async fn list_for_buyer(&self, buyer_id: &UserId) -> Result<Vec<Order>, RepositoryError>;

    /// Orders containing at least one line for a product the supplier
    /// listed, newest first.
    async fn list_for_supplier(&self, supplier_id: &UserId)
        -> Result<Vec<Order>, RepositoryError>;
}

#[async_trait]
pub trait PriceObservationRepository: Send + Sync {
    async fn record(&self, observation: PriceObservation) -> Result<(), RepositoryError>;

    async fn list_for_product(
        &self,
        product_id: &ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, RepositoryError>;
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn save(&self, snippet: KnowledgeSnippet) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &SnippetId)
        -> Result<Option<KnowledgeSnippet>, RepositoryError>;
    async fn list(&self) -> Result<Vec<KnowledgeSnippet>, RepositoryError>;

    async fn list_for_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<KnowledgeSnippet>, RepositoryError>;
}

pub(crate) fn parse_decimal(field: &str, raw: String) -> Result<Decimal, RepositoryError> {
    raw.parse::<Decimal>()
        .map_err(|err| RepositoryError::Decode(format!("invalid `{field}` decimal `{raw}`: {err}")))
}

pub(crate) fn parse_optional_decimal(
    field: &str,
    raw: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    raw.map(|value| parse_decimal(field, value)).transpose()
}

pub(crate) fn parse_timestamp(field: &str, raw: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| {
            RepositoryError::Decode(format!("invalid `{field}` timestamp `{raw}`: {err}"))
        })
}

pub(crate) fn parse_optional_date(
    field: &str,
    raw: Option<String>,
) -> Result<Option<chrono::NaiveDate>, RepositoryError> {
    raw.map(|value| {
        value.parse::<chrono::NaiveDate>().map_err(|err| {
            RepositoryError::Decode(format!("invalid `{field}` date `{value}`: {err}"))
        })
    })
    .transpose()
}
