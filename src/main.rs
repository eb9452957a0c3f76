// ===============================
// src/main.rs
// ===============================
/*
 # jalankan demo (mock venue) dengan log debug untuk engine
 RUST_LOG=order_engine=debug cargo run

 # metrik engine
 curl -s localhost:9898/metrics | egrep '^(orders_placed_total|order_events_total|open_positions|pnl_realized)'
*/
/*
=============================================================================
Project : order_engine — order & position lifecycle engine in Rust
Module  : main.rs

Summary : Demo driver. Opens one protected position per configured symbol
          on the mock venue, lets the take-profit fill, cleans up the
          leftover stop-loss and prints the engine statistics.
=============================================================================
*/
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::{select, sync::mpsc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use order_engine::{
    config,
    domain::Event,
    metrics, recorder,
    risk::{LimitsPolicy, RiskPolicy},
    EngineError, ManagedPosition, MockVenue, OrderEngine, OrderRequest, OrderUpdate, PositionStatus, Side,
};

const DEMO_MARK: Decimal = Decimal::ONE_HUNDRED;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Load config & limits ----
    let (args, engine_cfg, limits) = config::load();
    info!(
        symbols = ?args.symbols,
        api_timeout_ms = engine_cfg.api_timeout.as_millis() as u64,
        reconcile_ms = engine_cfg.reconcile_interval.as_millis() as u64,
        history_cap = engine_cfg.history_cap,
        "startup config"
    );

    // ---- Metrics ----
    metrics::init();
    metrics::serve_metrics(args.metrics_port);

    // ---- Recorder (optional) ----
    let rec_tx: Option<mpsc::Sender<Event>> = args.record_file.clone().map(|path| {
        let (tx, rx) = mpsc::channel::<Event>(8192);
        tokio::spawn(async move {
            if let Err(e) = recorder::run(rx, path).await {
                error!(?e, "recorder stopped");
            }
        });
        tx
    });

    // ---- Venue & engine ----
    let venue = Arc::new(MockVenue::new("mock").with_auto_fill(Duration::from_millis(args.mock_fill_ms)));
    for sym in &args.symbols {
        venue.set_mark(sym, DEMO_MARK);
    }
    let engine = OrderEngine::new(venue.clone(), engine_cfg);
    let risk = Arc::new(LimitsPolicy::new(limits));

    {
        let rec = rec_tx.clone();
        engine
            .set_order_update_callback(move |u: OrderUpdate| {
                info!(order_id = %u.order.id, symbol = %u.order.symbol, event = u.event.as_str(), "order update");
                if let Some(tx) = &rec {
                    let _ = tx.try_send(Event::Order(u));
                }
            })
            .await;

        let rec = rec_tx.clone();
        let risk = risk.clone();
        engine
            .set_position_update_callback(move |p: ManagedPosition| {
                if p.status == PositionStatus::Closed && !p.realized_pnl.is_zero() {
                    risk.record_pnl(p.realized_pnl);
                }
                info!(symbol = %p.symbol, side = ?p.side, status = ?p.status, pnl = %p.realized_pnl, "position update");
                if let Some(tx) = &rec {
                    let _ = tx.try_send(Event::Position(p));
                }
            })
            .await;

        engine.set_error_callback(|e: EngineError| warn!(error = %e, "engine error")).await;
    }

    if let Err(e) = engine.start().await {
        error!(error = %e, "engine start failed");
        return;
    }

    // ---- Entries ----
    let mut entries = 0usize;
    for sym in &args.symbols {
        if let Err(reason) = risk.can_trade() {
            warn!(%reason, "risk: trading paused");
            break;
        }
        let stop = DEMO_MARK * Decimal::new(98, 2);
        let target = DEMO_MARK * Decimal::new(103, 2);
        let qty = risk.calculate_position_size(DEMO_MARK, stop, risk.current_balance());
        let req = OrderRequest::market(sym.clone(), Side::Buy, qty).with_stop_loss(stop).with_take_profit(target);

        // market order: check notional at the mark
        let priced = OrderRequest { price: DEMO_MARK, ..req.clone() };
        if let Err(e) = risk.validate_order(&priced, &engine.positions().await) {
            warn!(symbol = %sym, error = %e, "risk rejected");
            continue;
        }
        match engine.place_order(req).await {
            Ok(o) => {
                entries += 1;
                info!(order_id = %o.id, symbol = %sym, qty = %qty, "entry submitted");
            }
            Err(e) => warn!(symbol = %sym, error = %e, "entry failed"),
        }
    }

    // ---- Drive the demo until flat, or Ctrl-C ----
    let mut marks_moved = entries == 0;
    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                let positions = engine.positions().await;
                let stats = engine.stats().await;
                info!(
                    open_orders = engine.open_orders().await.len(),
                    positions = positions.len(),
                    total = stats.total_orders,
                    "heartbeat"
                );

                if !marks_moved && positions.len() >= entries {
                    // push marks through the take-profit level
                    for sym in &args.symbols {
                        venue.set_mark(sym, DEMO_MARK * Decimal::new(104, 2));
                    }
                    marks_moved = true;
                }
                if marks_moved && positions.is_empty() {
                    break;
                }
            }
        }
    }

    // ---- Cleanup: leftover protective orders ----
    for o in engine.open_orders().await {
        if let Err(e) = engine.cancel_order(&o.id).await {
            warn!(order_id = %o.id, error = %e, "cleanup cancel failed");
        }
    }
    for p in engine.positions().await {
        if let Err(e) = engine.close_position(&p.symbol).await {
            warn!(symbol = %p.symbol, error = %e, "close failed");
        }
    }

    let stats = engine.stats().await;
    info!(
        total = stats.total_orders,
        terminal = stats.filled_orders,
        canceled = stats.canceled_orders,
        rejected = stats.rejected_orders,
        volume = %stats.total_volume,
        success_rate = stats.success_rate,
        balance = %risk.current_balance(),
        callback_failures = engine.callback_failures(),
        "final stats"
    );
    if let Some(tx) = &rec_tx {
        let _ = tx.try_send(Event::Note(format!("demo finished: {} orders", stats.total_orders)));
    }

    if let Err(e) = engine.stop().await {
        error!(error = %e, "engine stop failed");
    }
    drop(rec_tx);
    // beri recorder waktu flush
    tokio::time::sleep(Duration::from_millis(200)).await;
}
