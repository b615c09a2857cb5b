use chrono::Utc;
use rust_decimal::Decimal;

use kcart_core::domain::order::{Order, OrderId, OrderLine, OrderStatus, PaymentMode};
use kcart_core::domain::price::{PriceObservation, PriceSource};
use kcart_core::domain::product::ProductId;
use kcart_core::domain::user::UserId;
use kcart_db::repositories::{
    OrderRepository, PriceObservationRepository, ProductRepository, ReserveOutcome,
    SqlOrderRepository, SqlPriceObservationRepository, SqlProductRepository,
};
use kcart_db::{connect_with_settings, DbPool, SeedDataset};

async fn seeded_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    kcart_db::migrations::run_pending(&pool).await.expect("migrate");
    SeedDataset::load(&pool).await.expect("seed");
    pool
}

fn tomato_order(id: &str, quantity: i64) -> Order {
    Order {
        id: OrderId(id.to_string()),
        buyer_id: UserId("user-buyer-abebe-001".to_string()),
        lines: vec![OrderLine {
            product_id: ProductId("prod-tomato-001".to_string()),
            quantity: Decimal::from(quantity),
            unit_price: Decimal::from(55),
        }],
        delivery_date: None,
        delivery_location: Some("Bole".to_string()),
        payment_mode: Some(PaymentMode::CashOnDelivery),
        status: OrderStatus::Collecting,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn order_aggregate_round_trips_with_lines() {
    let pool = seeded_pool().await;
    let repo = SqlOrderRepository::new(pool);

    let order = tomato_order("order-rt-001", 5);
    repo.save(order.clone()).await.expect("save order");

    let found = repo.find_by_id(&order.id).await.expect("query").expect("order exists");
    assert_eq!(found.lines, order.lines);
    assert_eq!(found.payment_mode, Some(PaymentMode::CashOnDelivery));
    assert_eq!(found.total(), Decimal::from(275));
}

#[tokio::test]
async fn saving_again_replaces_lines_instead_of_appending() {
    let pool = seeded_pool().await;
    let repo = SqlOrderRepository::new(pool);

    let mut order = tomato_order("order-upd-001", 5);
    repo.save(order.clone()).await.expect("save order");

    order.lines.push(OrderLine {
        product_id: ProductId("prod-onion-001".to_string()),
        quantity: Decimal::from(2),
        unit_price: Decimal::from(48),
    });
    order.status = OrderStatus::Priced;
    repo.save(order.clone()).await.expect("save again");

    let found = repo.find_by_id(&order.id).await.expect("query").expect("order exists");
    assert_eq!(found.lines.len(), 2);
    assert_eq!(found.status, OrderStatus::Priced);
}

#[tokio::test]
async fn supplier_listing_joins_through_the_catalog() {
    let pool = seeded_pool().await;
    let repo = SqlOrderRepository::new(pool);

    repo.save(tomato_order("order-sup-001", 3)).await.expect("save order");

    let merkato = repo
        .list_for_supplier(&UserId("user-seller-merkato-001".to_string()))
        .await
        .expect("list for merkato supplier");
    assert_eq!(merkato.len(), 1);

    let dairy = repo
        .list_for_supplier(&UserId("user-seller-dairy-001".to_string()))
        .await
        .expect("list for dairy supplier");
    assert!(dairy.is_empty(), "no seeded order touches dairy products");
}

#[tokio::test]
async fn stock_reservation_decrements_and_reports_shortage() {
    let pool = seeded_pool().await;
    let repo = SqlProductRepository::new(pool);
    let tomato = ProductId("prod-tomato-001".to_string());

    let reserved = repo.reserve_stock(&tomato, Decimal::from(38)).await.expect("reserve");
    assert_eq!(reserved, ReserveOutcome::Reserved);

    let shortage = repo.reserve_stock(&tomato, Decimal::from(5)).await.expect("reserve");
    assert_eq!(shortage, ReserveOutcome::Insufficient { available: Decimal::from(2) });

    repo.release_stock(&tomato, Decimal::from(38)).await.expect("release");
    let after = repo.find_by_id(&tomato).await.expect("query").expect("exists");
    assert_eq!(after.stock, Decimal::from(40));
}

#[tokio::test]
async fn price_history_filters_by_window_start() {
    let pool = seeded_pool().await;
    let repo = SqlPriceObservationRepository::new(pool);
    let tomato = ProductId("prod-tomato-001".to_string());

    repo.record(PriceObservation {
        product_id: tomato.clone(),
        source: PriceSource::InternalSale,
        price: Decimal::from(56),
        quantity: Some(Decimal::from(15)),
        observed_at: Utc::now(),
    })
    .await
    .expect("record observation");

    let recent = repo
        .list_for_product(&tomato, Utc::now() - chrono::Duration::days(30))
        .await
        .expect("list observations");
    assert!(recent.len() >= 6, "seed plus the new observation should be inside the window");

    let none = repo
        .list_for_product(&ProductId("prod-missing".to_string()), Utc::now())
        .await
        .expect("list observations");
    assert!(none.is_empty());
}
