// ===============================
// src/venue.rs (venue boundary + mock venue)
// ===============================
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::debug;

use crate::domain::{Order, OrderKind, OrderStatus, Side, VenuePosition};
use crate::error::VenueError;

pub type VenueResult<T> = std::result::Result<T, VenueError>;

/// Remote venue as seen by the engine. Deadlines are applied by the caller.
#[async_trait]
pub trait Venue: Send + Sync {
    fn name(&self) -> &str;

    /// Submit an order; the returned copy carries the venue id and status.
    async fn place_order(&self, order: Order) -> VenueResult<Order>;

    async fn cancel_order(&self, order_id: &str) -> VenueResult<()>;

    async fn get_order(&self, order_id: &str) -> VenueResult<Order>;

    async fn get_positions(&self) -> VenueResult<Vec<VenuePosition>>;
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    orders: HashMap<String, Order>,
    positions: HashMap<String, VenuePosition>,
    marks: HashMap<String, Decimal>,
    place_calls: usize,
    cancel_calls: usize,
    place_failures: HashMap<usize, VenueError>,
    cancel_failure: Option<VenueError>,
    get_order_failure: Option<VenueError>,
    positions_failure: Option<VenueError>,
}

/// In-memory venue: ACKs immediately, fills marketable orders once `fill_after`
/// has elapsed (checked when the order is polled). Tests can script failures
/// and force statuses.
#[derive(Debug)]
pub struct MockVenue {
    name: String,
    fill_after: Option<Duration>,
    latency: Mutex<Duration>,
    state: Mutex<MockState>,
}

impl Default for MockVenue {
    fn default() -> Self { Self::new("mock") }
}

impl MockVenue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fill_after: None,
            latency: Mutex::new(Duration::ZERO),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Fill marketable orders after `delay`.
    pub fn with_auto_fill(mut self, delay: Duration) -> Self {
        self.fill_after = Some(delay);
        self
    }

    fn st(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every call sleeps this long first; used to exercise deadlines.
    pub fn set_latency(&self, d: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = d;
    }

    /// Fail the `n`-th placement (1-based, counted over the venue's lifetime).
    pub fn fail_place_call(&self, n: usize, err: VenueError) { self.st().place_failures.insert(n, err); }

    pub fn fail_cancels(&self, err: Option<VenueError>) { self.st().cancel_failure = err; }

    pub fn fail_get_order(&self, err: Option<VenueError>) { self.st().get_order_failure = err; }

    pub fn fail_positions(&self, err: Option<VenueError>) { self.st().positions_failure = err; }

    pub fn place_calls(&self) -> usize { self.st().place_calls }

    pub fn cancel_calls(&self) -> usize { self.st().cancel_calls }

    pub fn order(&self, id: &str) -> Option<Order> { self.st().orders.get(id).cloned() }

    pub fn orders(&self) -> Vec<Order> {
        let mut v: Vec<Order> = self.st().orders.values().cloned().collect();
        v.sort_by_key(|o| o.id.parse::<u64>().unwrap_or(u64::MAX));
        v
    }

    /// Reference price for market fills and unrealized PnL.
    pub fn set_mark(&self, symbol: &str, px: Decimal) {
        let mut st = self.st();
        st.marks.insert(symbol.to_string(), px);
        if let Some(p) = st.positions.get_mut(symbol) {
            p.mark_price = px;
            p.unrealized_pnl = (px - p.entry_price) * p.size;
        }
    }

    /// Force a status; `Filled` fills the full quantity at `px` (or the order price).
    pub fn set_status(&self, id: &str, status: OrderStatus, px: Option<Decimal>) -> bool {
        let mut st = self.st();
        let Some(mut o) = st.orders.get(id).cloned() else { return false };
        if let Some(px) = px {
            o.price = px;
        }
        match status {
            OrderStatus::Filled => {
                o.filled = o.quantity;
                apply_venue_fill(&mut st, &o);
            }
            OrderStatus::PartiallyFilled if o.filled.is_zero() => {
                o.filled = o.quantity / Decimal::TWO;
            }
            _ => {}
        }
        o.status = status;
        o.updated_at = Utc::now();
        st.orders.insert(id.to_string(), o);
        true
    }

    pub fn set_filled_qty(&self, id: &str, filled: Decimal) {
        if let Some(o) = self.st().orders.get_mut(id) {
            o.filled = filled;
            o.status = if filled >= o.quantity { OrderStatus::Filled } else { OrderStatus::PartiallyFilled };
            o.updated_at = Utc::now();
        }
    }

    async fn pace(&self) {
        let d = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if !d.is_zero() {
            sleep(d).await;
        }
    }
}

fn marketable(o: &Order, mark: Option<Decimal>) -> Option<Decimal> {
    match (o.kind, mark) {
        (OrderKind::StopLimit, _) => None,
        (OrderKind::Market, Some(m)) => Some(m),
        (OrderKind::Market, None) => (!o.price.is_zero()).then_some(o.price),
        (OrderKind::Limit, None) => Some(o.price),
        (OrderKind::Limit, Some(m)) => match o.side {
            Side::Buy if o.price >= m => Some(o.price),
            Side::Sell if o.price <= m => Some(o.price),
            _ => None,
        },
    }
}

// Net the venue-side position for the filled order.
fn apply_venue_fill(st: &mut MockState, o: &Order) {
    let signed = match o.side { Side::Buy => o.filled, Side::Sell => -o.filled };
    let mark = st.marks.get(&o.symbol).copied().unwrap_or(o.price);
    let pos = st.positions.entry(o.symbol.clone()).or_insert_with(|| VenuePosition {
        symbol: o.symbol.clone(),
        entry_price: o.price,
        ..Default::default()
    });
    if pos.size.is_zero() {
        pos.entry_price = o.price;
    }
    pos.size += signed;
    pos.mark_price = mark;
    pos.unrealized_pnl = (mark - pos.entry_price) * pos.size;
    if pos.size.is_zero() {
        st.positions.remove(&o.symbol);
    }
}

#[async_trait]
impl Venue for MockVenue {
    fn name(&self) -> &str { &self.name }

    async fn place_order(&self, mut order: Order) -> VenueResult<Order> {
        self.pace().await;
        let mut st = self.st();
        st.place_calls += 1;
        let call = st.place_calls;
        if let Some(err) = st.place_failures.remove(&call) {
            return Err(err);
        }
        st.next_id += 1;
        order.id = st.next_id.to_string();
        order.status = OrderStatus::Created;
        order.filled = Decimal::ZERO;
        order.updated_at = Utc::now();
        st.orders.insert(order.id.clone(), order.clone());
        debug!(venue = %self.name, id = %order.id, symbol = %order.symbol, "mock ack");
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> VenueResult<()> {
        self.pace().await;
        let mut st = self.st();
        st.cancel_calls += 1;
        if let Some(err) = st.cancel_failure.clone() {
            return Err(err);
        }
        let o = st.orders.get_mut(order_id).ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))?;
        if o.status.is_terminal() {
            return Err(VenueError::Rejected(format!("order {order_id} already {:?}", o.status)));
        }
        o.status = OrderStatus::Canceled;
        o.updated_at = Utc::now();
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> VenueResult<Order> {
        self.pace().await;
        let mut st = self.st();
        if let Some(err) = st.get_order_failure.clone() {
            return Err(err);
        }
        let mut o = st.orders.get(order_id).cloned().ok_or_else(|| VenueError::OrderNotFound(order_id.to_string()))?;

        if let Some(delay) = self.fill_after {
            let age = Utc::now().signed_duration_since(o.created_at).to_std().unwrap_or_default();
            let fill_px = marketable(&o, st.marks.get(&o.symbol).copied());
            if !o.status.is_terminal() && age >= delay {
                if let Some(px) = fill_px {
                    o.price = px;
                    o.filled = o.quantity;
                    o.status = OrderStatus::Filled;
                    o.updated_at = Utc::now();
                    apply_venue_fill(&mut st, &o);
                    st.orders.insert(o.id.clone(), o.clone());
                }
            }
        }
        Ok(o)
    }

    async fn get_positions(&self) -> VenueResult<Vec<VenuePosition>> {
        self.pace().await;
        let st = self.st();
        if let Some(err) = st.positions_failure.clone() {
            return Err(err);
        }
        Ok(st.positions.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeInForce;
    use rust_decimal_macros::dec;

    fn order(side: Side, kind: OrderKind, px: Decimal) -> Order {
        Order {
            id: String::new(),
            cl_id: "CL-1".into(),
            symbol: "BTC-USD".into(),
            side,
            kind,
            price: px,
            quantity: dec!(0.1),
            filled: Decimal::ZERO,
            status: OrderStatus::Created,
            stop_price: Decimal::ZERO,
            reduce_only: false,
            time_in_force: TimeInForce::Gtc,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn assigns_ids_and_scripts_failures() {
        let v = MockVenue::new("t");
        v.fail_place_call(2, VenueError::Rejected("nope".into()));
        let a = v.place_order(order(Side::Buy, OrderKind::Limit, dec!(100))).await.expect("first");
        assert_eq!(a.id, "1");
        assert!(v.place_order(order(Side::Buy, OrderKind::Limit, dec!(100))).await.is_err());
        let c = v.place_order(order(Side::Buy, OrderKind::Limit, dec!(100))).await.expect("third");
        assert_eq!(c.id, "2");
        assert_eq!(v.place_calls(), 3);
    }

    #[tokio::test]
    async fn auto_fill_skips_resting_and_stop_orders() {
        let v = MockVenue::new("t").with_auto_fill(Duration::ZERO);
        v.set_mark("BTC-USD", dec!(50000));
        let entry = v.place_order(order(Side::Buy, OrderKind::Market, Decimal::ZERO)).await.expect("ack");
        let tp = v.place_order(order(Side::Sell, OrderKind::Limit, dec!(51000))).await.expect("ack");
        let sl = v.place_order(order(Side::Sell, OrderKind::StopLimit, dec!(49000))).await.expect("ack");

        let filled = v.get_order(&entry.id).await.expect("poll");
        assert_eq!(filled.status, OrderStatus::Filled);
        assert_eq!(filled.price, dec!(50000));
        assert_eq!(v.get_order(&tp.id).await.expect("poll").status, OrderStatus::Created);
        assert_eq!(v.get_order(&sl.id).await.expect("poll").status, OrderStatus::Created);

        let pos = v.get_positions().await.expect("positions");
        assert_eq!(pos.len(), 1);
        assert_eq!(pos[0].size, dec!(0.1));
    }

    #[tokio::test]
    async fn cancel_of_terminal_order_is_rejected() {
        let v = MockVenue::new("t");
        let o = v.place_order(order(Side::Buy, OrderKind::Limit, dec!(100))).await.expect("ack");
        v.cancel_order(&o.id).await.expect("cancel");
        assert!(matches!(v.cancel_order(&o.id).await, Err(VenueError::Rejected(_))));
        assert!(matches!(v.cancel_order("404").await, Err(VenueError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn marks_drive_unrealized_pnl() {
        let v = MockVenue::new("t");
        let o = v.place_order(order(Side::Buy, OrderKind::Limit, dec!(50000))).await.expect("ack");
        assert!(v.set_status(&o.id, OrderStatus::Filled, None));
        v.set_mark("BTC-USD", dec!(50500));
        let pos = v.get_positions().await.expect("positions");
        assert_eq!(pos[0].mark_price, dec!(50500));
        assert_eq!(pos[0].unrealized_pnl, dec!(50.0));
    }
}
