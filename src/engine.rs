// ===============================
// src/engine.rs (order & position lifecycle engine)
// ===============================
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dispatch::{Callbacks, Dispatcher};
use crate::domain::{
    ManagedPosition, Order, OrderEvent, OrderKind, OrderRequest, OrderStats, OrderStatus, OrderUpdate,
    PositionStatus,
};
use crate::error::{EngineError, Operation, Result, VenueError};
use crate::ledger::OrderLedger;
use crate::metrics::{OPEN_ORDERS, ORDERS_PLACED, ROLLBACKS, STOP_LOSS_PLACED, TAKE_PROFIT_PLACED, VENUE_ERRORS};
use crate::reconcile;
use crate::validation::validate_request;
use crate::venue::{Venue, VenueResult};

pub(crate) enum RunState {
    Stopped,
    /// `stop_tx` is this run's stop signal; it is consumed by `stop`.
    Running { stop_tx: oneshot::Sender<()>, worker: JoinHandle<()> },
}

pub(crate) struct State {
    pub(crate) ledger: OrderLedger,
    pub(crate) callbacks: Callbacks,
    pub(crate) run: RunState,
}

pub(crate) struct Shared {
    pub(crate) venue: Arc<dyn Venue>,
    pub(crate) cfg: EngineConfig,
    pub(crate) state: RwLock<State>,
    pub(crate) dispatcher: Dispatcher,
    /// Serializes start/stop so a new worker is never spawned before the old one joined.
    pub(crate) lifecycle: Mutex<()>,
}

#[derive(Debug, Clone, Copy)]
enum Protection { StopLoss, TakeProfit }

impl Protection {
    fn op(&self) -> Operation {
        match self { Protection::StopLoss => Operation::PlaceStopLoss, Protection::TakeProfit => Operation::PlaceTakeProfit }
    }
    fn label(&self) -> &'static str {
        match self { Protection::StopLoss => "stop loss", Protection::TakeProfit => "take profit" }
    }
}

/// Cheap to clone; all clones share one ledger and one reconciliation worker.
#[derive(Clone)]
pub struct OrderEngine {
    pub(crate) shared: Arc<Shared>,
}

fn new_cl_id() -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    format!("CL-{}-{}", now, rand::thread_rng().gen::<u32>())
}

fn build_order(req: &OrderRequest) -> Order {
    let now = Utc::now();
    Order {
        id: String::new(),
        cl_id: new_cl_id(),
        symbol: req.symbol.clone(),
        side: req.side,
        kind: req.kind,
        price: req.price,
        quantity: req.quantity,
        filled: Decimal::ZERO,
        status: OrderStatus::Created,
        stop_price: if req.kind == OrderKind::StopLimit { req.price } else { Decimal::ZERO },
        reduce_only: req.reduce_only,
        time_in_force: req.time_in_force,
        created_at: now,
        updated_at: now,
    }
}

impl OrderEngine {
    pub fn new(venue: Arc<dyn Venue>, cfg: EngineConfig) -> Self {
        let ledger = OrderLedger::new(cfg.history_cap);
        Self {
            shared: Arc::new(Shared {
                venue,
                cfg,
                state: RwLock::new(State { ledger, callbacks: Callbacks::default(), run: RunState::Stopped }),
                dispatcher: Dispatcher::new(),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    // ---- Callbacks ----

    pub async fn set_order_update_callback<F>(&self, f: F)
    where
        F: Fn(OrderUpdate) + Send + Sync + 'static,
    {
        self.shared.state.write().await.callbacks.on_order = Some(Arc::new(f));
    }

    pub async fn set_position_update_callback<F>(&self, f: F)
    where
        F: Fn(ManagedPosition) + Send + Sync + 'static,
    {
        self.shared.state.write().await.callbacks.on_position = Some(Arc::new(f));
    }

    pub async fn set_error_callback<F>(&self, f: F)
    where
        F: Fn(EngineError) + Send + Sync + 'static,
    {
        self.shared.state.write().await.callbacks.on_error = Some(Arc::new(f));
    }

    /// Observer callbacks that panicked since the engine was built.
    pub fn callback_failures(&self) -> u64 { self.shared.dispatcher.failures() }

    pub(crate) async fn emit_order(&self, update: OrderUpdate) {
        let cb = self.shared.state.read().await.callbacks.on_order.clone();
        self.shared.dispatcher.order_update(cb, update).await;
    }

    pub(crate) async fn emit_position(&self, pos: ManagedPosition) {
        let cb = self.shared.state.read().await.callbacks.on_position.clone();
        self.shared.dispatcher.position_update(cb, pos).await;
    }

    pub(crate) async fn emit_error(&self, err: EngineError) {
        let cb = self.shared.state.read().await.callbacks.on_error.clone();
        self.shared.dispatcher.error(cb, err).await;
    }

    // ---- Lifecycle ----

    /// Spawn the reconciliation worker. Fails if it is already running.
    /// A worker that died on its own is reaped and replaced.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        let dead = {
            let mut st = self.shared.state.write().await;
            let finished = match &st.run {
                RunState::Running { worker, .. } => Some(worker.is_finished()),
                RunState::Stopped => None,
            };
            match finished {
                Some(false) => return Err(EngineError::AlreadyRunning),
                Some(true) => std::mem::replace(&mut st.run, RunState::Stopped),
                None => RunState::Stopped,
            }
        };
        if let RunState::Running { worker, .. } = dead {
            if let Err(e) = worker.await {
                warn!(?e, "previous reconciliation worker had died");
            }
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = tokio::spawn(reconcile::run(
            Arc::downgrade(&self.shared),
            stop_rx,
            self.shared.cfg.reconcile_interval,
        ));
        self.shared.state.write().await.run = RunState::Running { stop_tx, worker };
        info!(venue = %self.shared.venue.name(), interval_ms = self.shared.cfg.reconcile_interval.as_millis() as u64, "order engine started");
        Ok(())
    }

    /// Signal the worker and wait for it to exit. Stopping a stopped engine is a no-op.
    /// Returns `Worker` if the worker had died instead of exiting on the signal.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        let prev = {
            let mut st = self.shared.state.write().await;
            std::mem::replace(&mut st.run, RunState::Stopped)
        };
        let RunState::Running { stop_tx, worker } = prev else {
            return Ok(());
        };
        let _ = stop_tx.send(());
        if let Err(e) = worker.await {
            warn!(?e, "reconciliation worker ended abnormally");
            return Err(EngineError::Worker(e.to_string()));
        }
        info!("order engine stopped");
        Ok(())
    }

    /// True while a live worker is reconciling.
    pub async fn is_running(&self) -> bool {
        match &self.shared.state.read().await.run {
            RunState::Running { worker, .. } => !worker.is_finished(),
            RunState::Stopped => false,
        }
    }

    // ---- Venue calls ----

    /// Bound a venue call by the configured deadline and tag its failure.
    pub(crate) async fn call<T, F>(&self, op: Operation, target: &str, fut: F) -> Result<T>
    where
        F: Future<Output = VenueResult<T>>,
    {
        let deadline = self.shared.cfg.api_timeout;
        let res = match timeout(deadline, fut).await {
            Ok(r) => r,
            Err(_) => Err(VenueError::Timeout(deadline.as_millis() as u64)),
        };
        res.map_err(|e| {
            VENUE_ERRORS.with_label_values(&[op.as_str()]).inc();
            EngineError::exchange(op, target, e)
        })
    }

    // ---- Orders ----

    /// Validate, submit, book and protect an order.
    ///
    /// If a requested stop-loss or take-profit cannot be placed the primary is
    /// canceled before returning and the error is a `Rollback`.
    pub async fn place_order(&self, req: OrderRequest) -> Result<Order> {
        validate_request(Some(&req))?;

        let placed = match self.call(Operation::Place, &req.symbol, self.shared.venue.place_order(build_order(&req))).await {
            Ok(o) => o,
            Err(e) => {
                warn!(symbol = %req.symbol, error = %e, "order placement failed");
                self.emit_error(e.clone()).await;
                return Err(e);
            }
        };

        {
            let mut st = self.shared.state.write().await;
            st.ledger.insert_open(placed.clone());
            OPEN_ORDERS.set(st.ledger.open_len() as i64);
        }
        info!(order_id = %placed.id, cl_id = %placed.cl_id, symbol = %placed.symbol, side = placed.side.as_str(), qty = %placed.quantity, "order placed");
        self.emit_order(OrderUpdate::new(placed.clone(), OrderEvent::Created)).await;

        let mut stop_loss: Option<Order> = None;
        if let Some(px) = req.stop_loss_price() {
            match self.place_protective(&placed, Protection::StopLoss, px).await {
                Ok(o) => stop_loss = Some(o),
                Err(e) => return Err(self.roll_back(&placed, Protection::StopLoss, e, None).await),
            }
        }
        if let Some(px) = req.take_profit_price() {
            if let Err(e) = self.place_protective(&placed, Protection::TakeProfit, px).await {
                return Err(self.roll_back(&placed, Protection::TakeProfit, e, stop_loss.as_ref()).await);
            }
        }

        // counted once the order stands with all requested protection
        ORDERS_PLACED.with_label_values(&[&placed.symbol, placed.side.as_str()]).inc();
        Ok(placed)
    }

    async fn place_protective(&self, primary: &Order, kind: Protection, px: Decimal) -> Result<Order> {
        if px <= Decimal::ZERO {
            return Err(EngineError::validation(&primary.symbol, format!("{} price must be positive", kind.label())));
        }

        let now = Utc::now();
        let (order_kind, stop_price) = match kind {
            Protection::StopLoss => (OrderKind::StopLimit, px),
            Protection::TakeProfit => (OrderKind::Limit, Decimal::ZERO),
        };
        let order = Order {
            id: String::new(),
            cl_id: new_cl_id(),
            symbol: primary.symbol.clone(),
            side: primary.side.opposite(),
            kind: order_kind,
            price: px,
            quantity: primary.quantity,
            filled: Decimal::ZERO,
            status: OrderStatus::Created,
            stop_price,
            reduce_only: true,
            time_in_force: primary.time_in_force,
            created_at: now,
            updated_at: now,
        };

        let placed = match self.call(kind.op(), &primary.symbol, self.shared.venue.place_order(order)).await {
            Ok(o) => o,
            Err(e) => {
                self.emit_error(e.clone()).await;
                return Err(e);
            }
        };

        {
            let mut st = self.shared.state.write().await;
            st.ledger.insert_open(placed.clone());
            OPEN_ORDERS.set(st.ledger.open_len() as i64);
            // attach only if the entry already produced a position
            let entry = st.ledger.positions_mut().find(|p| p.entry_order_id == primary.id);
            if let Some(pos) = entry {
                match kind {
                    Protection::StopLoss => pos.stop_loss_order_id = Some(placed.id.clone()),
                    Protection::TakeProfit => pos.take_profit_order_id = Some(placed.id.clone()),
                }
            }
        }

        match kind {
            Protection::StopLoss => STOP_LOSS_PLACED.with_label_values(&[&placed.symbol]).inc(),
            Protection::TakeProfit => TAKE_PROFIT_PLACED.with_label_values(&[&placed.symbol]).inc(),
        }
        info!(order_id = %placed.id, primary_id = %primary.id, px = %px, "{} placed", kind.label());
        self.emit_order(OrderUpdate::new(placed.clone(), OrderEvent::Created)).await;
        Ok(placed)
    }

    /// Cancel the primary (and an already-placed stop-loss) on a task of its
    /// own so a dropped caller cannot abandon the compensation half way.
    async fn roll_back(&self, primary: &Order, kind: Protection, cause: EngineError, placed_stop: Option<&Order>) -> EngineError {
        warn!(order_id = %primary.id, symbol = %primary.symbol, error = %cause, "{} failed, rolling back primary", kind.label());
        ROLLBACKS.with_label_values(&[&primary.symbol]).inc();

        let engine = self.clone();
        let primary_id = primary.id.clone();
        let stop_id = placed_stop.map(|o| o.id.clone());
        let compensation = tokio::spawn(async move {
            if let Some(id) = stop_id {
                if let Err(e) = engine.cancel_order(&id).await {
                    warn!(order_id = %id, error = %e, "could not cancel stop loss during rollback");
                }
            }
            engine.cancel_order(&primary_id).await
        });

        let rollback = match compensation.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(Box::new(e)),
            Err(join) => Some(Box::new(EngineError::exchange(
                Operation::Cancel,
                &primary.id,
                VenueError::Unavailable(join.to_string()),
            ))),
        };

        EngineError::Rollback {
            op: kind.op(),
            symbol: primary.symbol.clone(),
            primary_id: primary.id.clone(),
            cause: Box::new(cause),
            rollback,
        }
    }

    /// Cancel at the venue, then retire the local copy into terminal history.
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        if let Err(e) = self.call(Operation::Cancel, order_id, self.shared.venue.cancel_order(order_id)).await {
            warn!(%order_id, error = %e, "cancel failed");
            self.emit_error(e.clone()).await;
            return Err(e);
        }

        let retired = {
            let mut st = self.shared.state.write().await;
            let r = st.ledger.retire(order_id, OrderStatus::Canceled);
            OPEN_ORDERS.set(st.ledger.open_len() as i64);
            r
        };

        match retired {
            Some(order) => {
                info!(%order_id, symbol = %order.symbol, "order canceled");
                self.emit_order(OrderUpdate::new(order, OrderEvent::Canceled)).await;
            }
            None => debug!(%order_id, "canceled order was not tracked locally"),
        }
        Ok(())
    }

    // ---- Positions ----

    /// Submit a reduce-only market order for the whole position and mark it
    /// closed right away. The fill, when reconciled, realizes the PnL.
    pub async fn close_position(&self, symbol: &str) -> Result<()> {
        let pos = self
            .shared
            .state
            .read()
            .await
            .ledger
            .position(symbol)
            .cloned()
            .ok_or_else(|| EngineError::PositionNotFound(symbol.to_string()))?;

        let mut req = OrderRequest::market(symbol, pos.side.closing_side(), pos.quantity);
        req.reduce_only = true;
        let order = self.place_order(req).await?;

        let updated = {
            let mut st = self.shared.state.write().await;
            st.ledger.position_mut(symbol).filter(|p| p.id == pos.id).map(|p| {
                p.status = PositionStatus::Closed;
                p.exit_time = Some(Utc::now());
                p.exit_order_id = Some(order.id.clone());
                p.clone()
            })
        };

        if let Some(p) = updated {
            info!(%symbol, exit_order_id = %order.id, "position marked closed");
            self.emit_position(p).await;
        }
        Ok(())
    }

    // ---- Snapshots ----

    pub async fn open_orders(&self) -> Vec<Order> { self.shared.state.read().await.ledger.open_orders() }

    /// Terminal orders, oldest first.
    pub async fn terminal_orders(&self) -> Vec<Order> {
        self.shared.state.read().await.ledger.history().iter().cloned().collect()
    }

    pub async fn positions(&self) -> Vec<ManagedPosition> { self.shared.state.read().await.ledger.positions() }

    pub async fn position(&self, symbol: &str) -> Option<ManagedPosition> {
        self.shared.state.read().await.ledger.position(symbol).cloned()
    }

    /// Ledger statistics. A volume that overflows is reported through the
    /// error callback and saturated in the result.
    pub async fn stats(&self) -> OrderStats {
        let stats = self.shared.state.read().await.ledger.stats();
        if stats.volume_saturated {
            warn!("total volume overflowed, saturated");
            self.emit_error(EngineError::Overflow("total volume".to_string())).await;
        }
        stats
    }
}
