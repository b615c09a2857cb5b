use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use kcart_core::domain::order::{Order, OrderId, OrderStatus};
use kcart_core::domain::price::{PriceObservation, PriceSource};
use kcart_core::flows::{OrderFlow, OrderFlowContext};
use kcart_db::repositories::{OrderRepository, PriceObservationRepository};

/// Deferred auto-confirmation for cash-on-delivery orders, keyed by order
/// id and decoupled from session lifetime.
///
/// Each scheduled order races a sleep against a oneshot cancel signal.
/// Once the sleep wins, the confirming mutation runs to completion; there
/// is no cancellation point inside it.
pub struct ConfirmationScheduler {
    delay: Duration,
    orders: Arc<dyn OrderRepository>,
    prices: Arc<dyn PriceObservationRepository>,
    pending: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl ConfirmationScheduler {
    pub fn new(
        delay_secs: u64,
        orders: Arc<dyn OrderRepository>,
        prices: Arc<dyn PriceObservationRepository>,
    ) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_secs(delay_secs),
            orders,
            prices,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub async fn schedule(self: Arc<Self>, order_id: OrderId) {
        let (cancel_tx, cancel_rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().await;
            // Rescheduling replaces the previous timer; dropping the old
            // sender cancels it.
            pending.insert(order_id.0.clone(), cancel_tx);
        }

        let scheduler = Arc::clone(&self);
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    scheduler.auto_confirm(&order_id).await;
                }
                _ = cancel_rx => {
                    info!(order_id = %order_id.0, event_name = "cod_timer_cancelled", "auto-confirm cancelled");
                }
            }
        });
    }

    /// Disarm the timer for an order. Returns false when no timer was
    /// pending (already fired or never scheduled).
    pub async fn cancel(&self, order_id: &OrderId) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.remove(&order_id.0) {
            Some(cancel_tx) => cancel_tx.send(()).is_ok(),
            None => false,
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn auto_confirm(&self, order_id: &OrderId) {
        {
            let mut pending = self.pending.lock().await;
            pending.remove(&order_id.0);
        }

        let order = match self.orders.find_by_id(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(order_id = %order_id.0, "auto-confirm found no such order");
                return;
            }
            Err(err) => {
                warn!(order_id = %order_id.0, error = %err, "auto-confirm could not load order");
                return;
            }
        };

        let flow = OrderFlow;
        let context =
            OrderFlowContext { payment_mode: order.payment_mode, ..OrderFlowContext::default() };
        let outcome = match flow.apply(
            &order.status,
            &kcart_core::flows::OrderEvent::AutoConfirmElapsed,
            &context,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                // Late timer against an already-resolved order; nothing to do.
                info!(order_id = %order_id.0, error = %err, "auto-confirm skipped");
                return;
            }
        };

        let mut confirmed = order;
        confirmed.status = outcome.to;
        if let Err(err) = self.orders.save(confirmed.clone()).await {
            warn!(order_id = %order_id.0, error = %err, "auto-confirm could not persist order");
            return;
        }

        info!(order_id = %order_id.0, event_name = "order_auto_confirmed", "cod order confirmed");
        record_confirmed_sales(self.prices.as_ref(), &confirmed).await;
    }
}

/// Confirmed orders feed the pricing engine: each line becomes an
/// internal-sale observation at its snapshot price.
pub async fn record_confirmed_sales(prices: &dyn PriceObservationRepository, order: &Order) {
    debug_assert_eq!(order.status, OrderStatus::Confirmed);
    for line in &order.lines {
        let observation = PriceObservation {
            product_id: line.product_id.clone(),
            source: PriceSource::InternalSale,
            price: line.unit_price,
            quantity: Some(line.quantity),
            observed_at: Utc::now(),
        };
        if let Err(err) = prices.record(observation).await {
            warn!(order_id = %order.id.0, error = %err, "could not record sale observation");
        }
    }
}
