use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use kcart_core::domain::knowledge::{KnowledgeSnippet, SnippetId};
use kcart_core::domain::order::{Order, OrderId};
use kcart_core::domain::price::PriceObservation;
use kcart_core::domain::product::{Product, ProductId};
use kcart_core::domain::user::{User, UserId};

use super::{
    KnowledgeRepository, OrderRepository, PriceObservationRepository, ProductRepository,
    RepositoryError, ReserveOutcome, UserRepository,
};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.values().find(|user| user.phone == phone).cloned())
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<String, Product>>,
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.get(&id.0).cloned())
    }

    async fn search(&self, query: &str) -> Result<Vec<Product>, RepositoryError> {
        let needle = query.trim().to_lowercase();
        let products = self.products.read().await;
        let mut matches: Vec<Product> = products
            .values()
            .filter(|product| product.active)
            .filter(|product| {
                product.name.to_lowercase().contains(&needle)
                    || product
                        .local_name
                        .as_deref()
                        .map(|local| local.contains(query.trim()))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matches)
    }

    async fn list_by_supplier(
        &self,
        supplier_id: &UserId,
    ) -> Result<Vec<Product>, RepositoryError> {
        let products = self.products.read().await;
        let mut matches: Vec<Product> =
            products.values().filter(|product| &product.supplier_id == supplier_id).cloned().collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matches)
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        products.insert(product.id.0.clone(), product);
        Ok(())
    }

    async fn reserve_stock(
        &self,
        id: &ProductId,
        quantity: Decimal,
    ) -> Result<ReserveOutcome, RepositoryError> {
        // Check and decrement under one write lock so two reservations for
        // the last unit cannot both pass.
        let mut products = self.products.write().await;
        let Some(product) = products.get_mut(&id.0) else {
            return Ok(ReserveOutcome::MissingProduct);
        };

        if product.stock < quantity {
            return Ok(ReserveOutcome::Insufficient { available: product.stock });
        }

        product.stock -= quantity;
        Ok(ReserveOutcome::Reserved)
    }

    async fn release_stock(
        &self,
        id: &ProductId,
        quantity: Decimal,
    ) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        if let Some(product) = products.get_mut(&id.0) {
            product.stock += quantity;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, Order>>,
    /// Supplier filtering joins through the catalog; without one the
    /// supplier listing is empty.
    catalog: Option<Arc<dyn ProductRepository>>,
}

impl InMemoryOrderRepository {
    pub fn with_catalog(catalog: Arc<dyn ProductRepository>) -> Self {
        Self { orders: RwLock::new(HashMap::new()), catalog: Some(catalog) }
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id.0).cloned())
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id.0.clone(), order);
        Ok(())
    }

    async fn list_for_buyer(&self, buyer_id: &UserId) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        let mut matches: Vec<Order> =
            orders.values().filter(|order| &order.buyer_id == buyer_id).cloned().collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    async fn list_for_supplier(
        &self,
        supplier_id: &UserId,
    ) -> Result<Vec<Order>, RepositoryError> {
        let Some(catalog) = &self.catalog else {
            return Ok(Vec::new());
        };

        let supplied: HashSet<ProductId> = catalog
            .list_by_supplier(supplier_id)
            .await?
            .into_iter()
            .map(|product| product.id)
            .collect();

        let orders = self.orders.read().await;
        let mut matches: Vec<Order> = orders
            .values()
            .filter(|order| order.lines.iter().any(|line| supplied.contains(&line.product_id)))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }
}

#[derive(Default)]
pub struct InMemoryPriceObservationRepository {
    observations: RwLock<Vec<PriceObservation>>,
}

#[async_trait::async_trait]
impl PriceObservationRepository for InMemoryPriceObservationRepository {
    async fn record(&self, observation: PriceObservation) -> Result<(), RepositoryError> {
        let mut observations = self.observations.write().await;
        observations.push(observation);
        Ok(())
    }

    async fn list_for_product(
        &self,
        product_id: &ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, RepositoryError> {
        let observations = self.observations.read().await;
        let mut matches: Vec<PriceObservation> = observations
            .iter()
            .filter(|observation| {
                &observation.product_id == product_id && observation.observed_at >= since
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.observed_at.cmp(&b.observed_at));
        Ok(matches)
    }
}

#[derive(Default)]
pub struct InMemoryKnowledgeRepository {
    snippets: RwLock<HashMap<String, KnowledgeSnippet>>,
}

#[async_trait::async_trait]
impl KnowledgeRepository for InMemoryKnowledgeRepository {
    async fn save(&self, snippet: KnowledgeSnippet) -> Result<(), RepositoryError> {
        let mut snippets = self.snippets.write().await;
        snippets.insert(snippet.id.0.clone(), snippet);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &SnippetId,
    ) -> Result<Option<KnowledgeSnippet>, RepositoryError> {
        let snippets = self.snippets.read().await;
        Ok(snippets.get(&id.0).cloned())
    }

    async fn list(&self) -> Result<Vec<KnowledgeSnippet>, RepositoryError> {
        let snippets = self.snippets.read().await;
        let mut all: Vec<KnowledgeSnippet> = snippets.values().cloned().collect();
        all.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(all)
    }

    async fn list_for_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<KnowledgeSnippet>, RepositoryError> {
        let snippets = self.snippets.read().await;
        let mut matches: Vec<KnowledgeSnippet> = snippets
            .values()
            .filter(|snippet| snippet.product_id.as_ref() == Some(product_id))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use kcart_core::domain::product::{Category, Product, ProductId};
    use kcart_core::domain::user::{User, UserId, UserType};

    use crate::repositories::{
        InMemoryProductRepository, InMemoryUserRepository, ProductRepository, ReserveOutcome,
        UserRepository,
    };

    fn tomato(stock: i64) -> Product {
        Product {
            id: ProductId("p-tomato".to_string()),
            name: "Tomato".to_string(),
            local_name: Some("ቲማቲም".to_string()),
            category: Category::Horticulture,
            unit: "kg".to_string(),
            unit_price: Decimal::new(5500, 2),
            stock: Decimal::from(stock),
            expiry_date: None,
            supplier_id: UserId("s-1".to_string()),
            image_ref: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn user_repo_finds_by_phone() {
        let repo = InMemoryUserRepository::default();
        let user = User {
            id: UserId("u-1".to_string()),
            name: "Abebe".to_string(),
            phone: "+251911000000".to_string(),
            location: Some("Addis Ababa".to_string()),
            user_type: UserType::Buyer,
            created_at: Utc::now(),
        };

        repo.save(user.clone()).await.expect("save user");
        let found = repo.find_by_phone("+251911000000").await.expect("find user");
        assert_eq!(found, Some(user));
    }

    #[tokio::test]
    async fn search_matches_amharic_local_name() {
        let repo = InMemoryProductRepository::default();
        repo.save(tomato(10)).await.expect("save product");

        let by_latin = repo.search("toma").await.expect("search");
        let by_amharic = repo.search("ቲማቲም").await.expect("search");
        assert_eq!(by_latin.len(), 1);
        assert_eq!(by_amharic.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_reservations_for_the_last_unit_yield_one_winner() {
        let repo = Arc::new(InMemoryProductRepository::default());
        repo.save(tomato(1)).await.expect("save product");

        let id = ProductId("p-tomato".to_string());
        let a = {
            let repo = Arc::clone(&repo);
            let id = id.clone();
            tokio::spawn(async move { repo.reserve_stock(&id, Decimal::ONE).await })
        };
        let b = {
            let repo = Arc::clone(&repo);
            let id = id.clone();
            tokio::spawn(async move { repo.reserve_stock(&id, Decimal::ONE).await })
        };

        let outcomes = [
            a.await.expect("join").expect("reserve"),
            b.await.expect("join").expect("reserve"),
        ];

        let wins =
            outcomes.iter().filter(|outcome| **outcome == ReserveOutcome::Reserved).count();
        assert_eq!(wins, 1, "exactly one reservation should win the last unit");

        let product = repo.find_by_id(&id).await.expect("find").expect("exists");
        assert_eq!(product.stock, Decimal::ZERO);
    }

    #[tokio::test]
    async fn released_stock_becomes_reservable_again() {
        let repo = InMemoryProductRepository::default();
        repo.save(tomato(1)).await.expect("save product");
        let id = ProductId("p-tomato".to_string());

        assert_eq!(
            repo.reserve_stock(&id, Decimal::ONE).await.expect("reserve"),
            ReserveOutcome::Reserved
        );
        assert!(matches!(
            repo.reserve_stock(&id, Decimal::ONE).await.expect("reserve"),
            ReserveOutcome::Insufficient { .. }
        ));

        repo.release_stock(&id, Decimal::ONE).await.expect("release");
        assert_eq!(
            repo.reserve_stock(&id, Decimal::ONE).await.expect("reserve"),
            ReserveOutcome::Reserved
        );
    }
}
