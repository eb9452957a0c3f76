// ===============================
// src/reconcile.rs (venue polling & status transitions)
// ===============================
use std::sync::Weak;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::{ManagedPosition, Order, OrderEvent, OrderStatus, OrderUpdate};
use crate::engine::{OrderEngine, Shared};
use crate::error::{EngineError, Operation};
use crate::metrics::{OPEN_ORDERS, RECONCILE_TICKS};
use crate::positions::{apply_fill, apply_marks};

/// Worker body. Exits on the stop signal, or once every engine handle is gone.
pub(crate) async fn run(shared: Weak<Shared>, mut stop_rx: oneshot::Receiver<()>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else { break };
                let engine = OrderEngine { shared };
                // a panicking pass costs one tick, not the loop
                let pass = tokio::spawn({
                    let engine = engine.clone();
                    async move { engine.reconcile_once().await }
                });
                if let Err(e) = pass.await {
                    error!(error = %e, "reconciliation pass panicked");
                    engine.emit_error(EngineError::Worker(e.to_string())).await;
                }
            }
        }
    }
    info!("reconciliation loop exited");
}

impl OrderEngine {
    /// One reconciliation pass: order statuses first, then position marks.
    pub async fn reconcile_once(&self) {
        RECONCILE_TICKS.inc();
        self.reconcile_orders().await;
        self.reconcile_positions().await;
    }

    async fn reconcile_orders(&self) {
        let ids = self.shared.state.read().await.ledger.open_ids();
        for id in ids {
            let remote = match self.call(Operation::GetOrder, &id, self.shared.venue.get_order(&id)).await {
                Ok(o) => o,
                Err(e) => {
                    // skipped this tick, polled again on the next
                    debug!(order_id = %id, error = %e, "order poll failed");
                    self.emit_error(e).await;
                    continue;
                }
            };
            self.apply_transition(remote).await;
        }
    }

    async fn reconcile_positions(&self) {
        let marks = match self.call(Operation::GetPositions, self.shared.venue.name(), self.shared.venue.get_positions()).await {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "position poll failed");
                self.emit_error(e).await;
                return;
            }
        };
        let mut st = self.shared.state.write().await;
        let touched = apply_marks(&mut st.ledger, &marks);
        if touched > 0 {
            debug!(touched, "position marks refreshed");
        }
    }

    /// Apply a venue snapshot of an open order. No-op if the status did not move
    /// or the order is no longer tracked.
    pub(crate) async fn apply_transition(&self, remote: Order) {
        let (update, position, failure): (OrderUpdate, Option<ManagedPosition>, Option<EngineError>) = {
            let mut st = self.shared.state.write().await;
            let Some(local) = st.ledger.open_order(&remote.id) else { return };
            if local.status == remote.status {
                return;
            }
            let from = local.status;

            let out = match remote.status {
                OrderStatus::Filled => {
                    let Some(mut order) = st.ledger.remove_open(&remote.id) else { return };
                    order.status = OrderStatus::Filled;
                    order.filled = remote.filled;
                    order.price = remote.price;
                    order.updated_at = Utc::now();
                    st.ledger.push_terminal(order.clone());
                    let leverage = self.shared.cfg.default_leverage;
                    match apply_fill(&mut st.ledger, &order, leverage) {
                        Ok(pos) => (OrderUpdate::new(order, OrderEvent::Filled), pos, None),
                        // order is still filled, the position stays as it was
                        Err(e) => (OrderUpdate::new(order, OrderEvent::Filled), None, Some(e)),
                    }
                }
                OrderStatus::PartiallyFilled => {
                    let Some(order) = st.ledger.open_order_mut(&remote.id) else { return };
                    order.status = OrderStatus::PartiallyFilled;
                    order.filled = remote.filled;
                    order.updated_at = Utc::now();
                    (OrderUpdate::new(order.clone(), OrderEvent::PartiallyFilled), None, None)
                }
                OrderStatus::Canceled => {
                    // the explicit cancel path owns the history append
                    let Some(mut order) = st.ledger.remove_open(&remote.id) else { return };
                    order.status = OrderStatus::Canceled;
                    order.updated_at = Utc::now();
                    (OrderUpdate::new(order, OrderEvent::Canceled), None, None)
                }
                OrderStatus::Rejected | OrderStatus::Expired => {
                    let Some(order) = st.ledger.retire(&remote.id, remote.status) else { return };
                    (OrderUpdate::new(order, OrderEvent::from(remote.status)), None, None)
                }
                OrderStatus::Created => {
                    warn!(order_id = %remote.id, ?from, "venue reports order back in created state, ignoring");
                    return;
                }
            };
            OPEN_ORDERS.set(st.ledger.open_len() as i64);
            out
        };

        info!(order_id = %update.order.id, symbol = %update.order.symbol, event = update.event.as_str(), "order transition");
        self.emit_order(update).await;
        if let Some(p) = position {
            self.emit_position(p).await;
        }
        if let Some(e) = failure {
            self.emit_error(e).await;
        }
    }
}
