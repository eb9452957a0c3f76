// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Order flow --------
pub static ORDERS_PLACED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_placed_total", "primary orders accepted by the venue"),
        &["symbol", "side"],
    )
    .unwrap()
});

pub static STOP_LOSS_PLACED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stop_loss_placed_total", "protective stop-loss orders placed"),
        &["symbol"],
    )
    .unwrap()
});

pub static TAKE_PROFIT_PLACED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("take_profit_placed_total", "protective take-profit orders placed"),
        &["symbol"],
    )
    .unwrap()
});

pub static ROLLBACKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("protection_rollbacks_total", "primaries canceled after a failed protective order"),
        &["symbol"],
    )
    .unwrap()
});

pub static ORDER_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("order_events_total", "order lifecycle events emitted"),
        &["event"],
    )
    .unwrap()
});

pub static VENUE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("venue_errors_total", "failed venue calls (labels: op)"),
        &["op"],
    )
    .unwrap()
});

pub static CALLBACK_PANICS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("callback_panics_total", "observer callbacks that panicked").unwrap()
});

pub static RECONCILE_TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("reconcile_ticks_total", "reconciliation loop iterations").unwrap());

// -------- Book state --------
pub static OPEN_ORDERS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("open_orders", "orders currently open in the ledger").unwrap());

pub static OPEN_POSITIONS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("open_positions", "positions currently open").unwrap());

pub static PNL_REALIZED: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("pnl_realized", "realized PnL accumulated since start").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(ORDERS_PLACED.clone())),
        REGISTRY.register(Box::new(STOP_LOSS_PLACED.clone())),
        REGISTRY.register(Box::new(TAKE_PROFIT_PLACED.clone())),
        REGISTRY.register(Box::new(ROLLBACKS.clone())),
        REGISTRY.register(Box::new(ORDER_EVENTS.clone())),
        REGISTRY.register(Box::new(VENUE_ERRORS.clone())),
        REGISTRY.register(Box::new(CALLBACK_PANICS.clone())),
        REGISTRY.register(Box::new(RECONCILE_TICKS.clone())),
        REGISTRY.register(Box::new(OPEN_ORDERS.clone())),
        REGISTRY.register(Box::new(OPEN_POSITIONS.clone())),
        REGISTRY.register(Box::new(PNL_REALIZED.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics)
fn handle_client(mut stream: TcpStream) {
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Metrics server on a dedicated OS thread (keeps Tokio runtime clean)
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, ?e, "metrics bind failed, endpoint disabled");
                return;
            }
        };
        tracing::info!(%addr, "metrics listening on / and /metrics");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(?e, "metrics accept error"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_exports_engine_metrics() {
        init();
        ORDERS_PLACED.with_label_values(&["BTC-USD", "buy"]).inc();
        CALLBACK_PANICS.inc();
        let text = String::from_utf8(encode_metrics()).expect("utf8");
        assert!(text.contains("orders_placed_total"));
        assert!(text.contains("callback_panics_total"));
    }
}
