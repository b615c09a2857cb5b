use std::sync::Arc;

use kcart_agent::retrieval::KeywordSearch;
use kcart_agent::session::ActiveFlow;
use kcart_agent::timers::ConfirmationScheduler;
use kcart_agent::toolset::{standard_registry, ToolDeps};
use kcart_agent::PlaceholderImageGenerator;
use kcart_core::domain::user::UserType;
use kcart_core::pricing::PricingInsightEngine;
use kcart_db::repositories::{
    InMemoryKnowledgeRepository, InMemoryOrderRepository, InMemoryPriceObservationRepository,
    InMemoryProductRepository, InMemoryUserRepository,
};

/// Render the per-user-type tool catalog. The registry is assembled over
/// throwaway in-memory stores; only the descriptors matter here.
pub fn run() -> String {
    let orders = Arc::new(InMemoryOrderRepository::default());
    let prices = Arc::new(InMemoryPriceObservationRepository::default());
    let knowledge = Arc::new(InMemoryKnowledgeRepository::default());

    let deps = Arc::new(ToolDeps {
        users: Arc::new(InMemoryUserRepository::default()),
        products: Arc::new(InMemoryProductRepository::default()),
        orders: orders.clone(),
        prices: prices.clone(),
        search: Arc::new(KeywordSearch::new(knowledge)),
        images: Arc::new(PlaceholderImageGenerator),
        pricing: PricingInsightEngine::default(),
        scheduler: ConfirmationScheduler::new(0, orders, prices),
        retrieval_top_k: 3,
    });
    let registry = standard_registry(deps);

    let mut lines = Vec::new();
    for (label, user_type, flow) in [
        ("unregistered", UserType::Unknown, ActiveFlow::Idle),
        ("buyer", UserType::Buyer, ActiveFlow::Idle),
        ("seller", UserType::Seller, ActiveFlow::Idle),
        ("seller while onboarding a listing", UserType::Seller, ActiveFlow::Onboarding),
    ] {
        lines.push(format!("{label}:"));
        for descriptor in registry.catalog(user_type, &flow) {
            lines.push(format!("  {} - {}", descriptor.name, descriptor.description));
        }
    }
    lines.join("\n")
}
