// ===============================
// src/dispatch.rs (observer callbacks)
// ===============================
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::domain::{ManagedPosition, OrderUpdate};
use crate::error::EngineError;
use crate::metrics::{CALLBACK_PANICS, ORDER_EVENTS};

pub type OrderCallback = Arc<dyn Fn(OrderUpdate) + Send + Sync>;
pub type PositionCallback = Arc<dyn Fn(ManagedPosition) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(EngineError) + Send + Sync>;

/// One slot per observer kind; setting a slot replaces the previous callback.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_order: Option<OrderCallback>,
    pub on_position: Option<PositionCallback>,
    pub on_error: Option<ErrorCallback>,
}

/// Runs callbacks on the blocking pool so a panic ends that task only.
#[derive(Debug, Default)]
pub struct Dispatcher {
    failures: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self { Self::default() }

    /// Callbacks that panicked (or whose task was lost) since creation.
    pub fn failures(&self) -> u64 { self.failures.load(Ordering::Relaxed) }

    async fn supervised<F>(&self, kind: &'static str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match tokio::task::spawn_blocking(f).await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                CALLBACK_PANICS.inc();
                error!(callback = kind, "observer callback panicked, recovered");
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(callback = kind, ?e, "observer callback task did not complete");
            }
        }
    }

    pub async fn order_update(&self, cb: Option<OrderCallback>, update: OrderUpdate) {
        ORDER_EVENTS.with_label_values(&[update.event.as_str()]).inc();
        if let Some(cb) = cb {
            self.supervised("order_update", move || cb(update)).await;
        }
    }

    pub async fn position_update(&self, cb: Option<PositionCallback>, pos: ManagedPosition) {
        if let Some(cb) = cb {
            self.supervised("position_update", move || cb(pos)).await;
        }
    }

    pub async fn error(&self, cb: Option<ErrorCallback>, err: EngineError) {
        if let Some(cb) = cb {
            self.supervised("error", move || cb(err)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Operation, VenueError};
    use std::sync::Mutex;

    #[tokio::test]
    async fn panicking_callback_is_counted_not_propagated() {
        let d = Dispatcher::new();
        let cb: ErrorCallback = Arc::new(|_e: EngineError| panic!("observer blew up"));
        d.error(Some(cb), EngineError::exchange(Operation::Cancel, "1", VenueError::Timeout(1))).await;
        assert_eq!(d.failures(), 1);
    }

    #[tokio::test]
    async fn healthy_callback_receives_value() {
        let d = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: ErrorCallback = Arc::new(move |e: EngineError| sink.lock().unwrap().push(e.to_string()));
        d.error(Some(cb), EngineError::PositionNotFound("BTC-USD".into())).await;
        assert_eq!(d.failures(), 0);
        assert_eq!(*seen.lock().unwrap(), vec!["position not found: BTC-USD".to_string()]);
    }

    #[tokio::test]
    async fn empty_slot_is_a_noop() {
        let d = Dispatcher::new();
        d.error(None, EngineError::AlreadyRunning).await;
        assert_eq!(d.failures(), 0);
    }
}
