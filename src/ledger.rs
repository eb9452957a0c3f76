// ===============================
// src/ledger.rs (open orders, terminal history, live positions)
// ===============================
use std::collections::VecDeque;

use ahash::AHashMap as HashMap;
use rust_decimal::Decimal;

use crate::domain::{ManagedPosition, Order, OrderStatus, OrderStats};

/// In-memory book shared by the foreground API and the reconciliation loop.
/// Callers hold the engine lock around every method here.
#[derive(Debug)]
pub struct OrderLedger {
    open: HashMap<String, Order>,
    history: VecDeque<Order>,
    history_cap: usize,
    positions: HashMap<String, ManagedPosition>,
}

impl OrderLedger {
    pub fn new(history_cap: usize) -> Self {
        let history_cap = history_cap.max(1);
        Self {
            open: HashMap::new(),
            history: VecDeque::with_capacity(history_cap),
            history_cap,
            positions: HashMap::new(),
        }
    }

    pub fn insert_open(&mut self, order: Order) { self.open.insert(order.id.clone(), order); }

    pub fn open_order(&self, id: &str) -> Option<&Order> { self.open.get(id) }

    pub fn open_order_mut(&mut self, id: &str) -> Option<&mut Order> { self.open.get_mut(id) }

    pub fn remove_open(&mut self, id: &str) -> Option<Order> { self.open.remove(id) }

    pub fn open_ids(&self) -> Vec<String> { self.open.keys().cloned().collect() }

    pub fn open_orders(&self) -> Vec<Order> { self.open.values().cloned().collect() }

    pub fn open_len(&self) -> usize { self.open.len() }

    /// Append to the terminal ring, evicting the oldest entry once full.
    pub fn push_terminal(&mut self, order: Order) {
        while self.history.len() >= self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(order);
    }

    /// Move an open order into terminal history with the given status.
    pub fn retire(&mut self, id: &str, status: OrderStatus) -> Option<Order> {
        let mut order = self.open.remove(id)?;
        order.status = status;
        order.updated_at = chrono::Utc::now();
        self.push_terminal(order.clone());
        Some(order)
    }

    pub fn history(&self) -> &VecDeque<Order> { &self.history }

    pub fn position(&self, symbol: &str) -> Option<&ManagedPosition> { self.positions.get(symbol) }

    pub fn position_mut(&mut self, symbol: &str) -> Option<&mut ManagedPosition> { self.positions.get_mut(symbol) }

    pub fn insert_position(&mut self, pos: ManagedPosition) { self.positions.insert(pos.symbol.clone(), pos); }

    pub fn remove_position(&mut self, symbol: &str) -> Option<ManagedPosition> { self.positions.remove(symbol) }

    pub fn positions(&self) -> Vec<ManagedPosition> { self.positions.values().cloned().collect() }

    pub fn positions_mut(&mut self) -> impl Iterator<Item = &mut ManagedPosition> { self.positions.values_mut() }

    pub fn positions_len(&self) -> usize { self.positions.len() }

    /// "filled" counts the whole terminal ring, canceled entries included.
    pub fn stats(&self) -> OrderStats {
        let filled_orders = self.history.len();
        let total_orders = filled_orders + self.open.len();
        let mut stats = OrderStats { total_orders, filled_orders, ..Default::default() };

        for o in &self.history {
            let volume = o.filled.checked_mul(o.price).and_then(|v| stats.total_volume.checked_add(v));
            match volume {
                Some(v) if !stats.volume_saturated => stats.total_volume = v,
                _ => {
                    stats.total_volume = Decimal::MAX;
                    stats.volume_saturated = true;
                }
            }
            match o.status {
                OrderStatus::Canceled => stats.canceled_orders += 1,
                OrderStatus::Rejected => stats.rejected_orders += 1,
                _ => {}
            }
        }
        if total_orders > 0 {
            stats.success_rate = filled_orders as f64 / total_orders as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderKind, Side, TimeInForce};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    pub(crate) fn order(id: &str, status: OrderStatus, price: Decimal, filled: Decimal) -> Order {
        Order {
            id: id.to_string(),
            cl_id: format!("CL-{id}"),
            symbol: "BTC-USD".to_string(),
            side: Side::Buy,
            kind: OrderKind::Limit,
            price,
            quantity: dec!(0.1),
            filled,
            status,
            stop_price: Decimal::ZERO,
            reduce_only: false,
            time_in_force: TimeInForce::Gtc,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn history_keeps_most_recent_entries() {
        let mut l = OrderLedger::new(1000);
        for i in 0..2500 {
            l.push_terminal(order(&i.to_string(), OrderStatus::Filled, dec!(1), dec!(1)));
            assert!(l.history().len() <= 1000);
        }
        assert_eq!(l.history().len(), 1000);
        assert_eq!(l.history().front().map(|o| o.id.as_str()), Some("1500"));
        assert_eq!(l.history().back().map(|o| o.id.as_str()), Some("2499"));
    }

    #[test]
    fn retire_moves_order_out_of_open_set() {
        let mut l = OrderLedger::new(10);
        l.insert_open(order("a", OrderStatus::Created, dec!(100), dec!(0)));
        let retired = l.retire("a", OrderStatus::Canceled).expect("open order");
        assert_eq!(retired.status, OrderStatus::Canceled);
        assert!(l.open_order("a").is_none());
        assert_eq!(l.history().len(), 1);
        assert!(l.retire("a", OrderStatus::Canceled).is_none());
        assert_eq!(l.history().len(), 1);
    }

    #[test]
    fn stats_count_terminal_ring_literally() {
        let mut l = OrderLedger::new(1000);
        l.push_terminal(order("f", OrderStatus::Filled, dec!(50000), dec!(0.1)));
        l.push_terminal(order("c", OrderStatus::Canceled, dec!(50000), dec!(0)));
        let s = l.stats();
        assert_eq!(s.total_orders, 2);
        assert_eq!(s.filled_orders, 2);
        assert_eq!(s.canceled_orders, 1);
        assert_eq!(s.total_volume, dec!(5000));
        assert_eq!(s.success_rate, 1.0);
    }

    #[test]
    fn empty_ledger_has_zero_success_rate() {
        let s = OrderLedger::new(5).stats();
        assert_eq!(s.total_orders, 0);
        assert_eq!(s.success_rate, 0.0);
    }

    #[test]
    fn oversized_volume_saturates_instead_of_panicking() {
        let mut l = OrderLedger::new(10);
        let price = Decimal::from(1_000_000_000_000_000u64);
        let qty = Decimal::from(100_000_000_000_000u64);
        l.push_terminal(order("big", OrderStatus::Filled, price, qty));
        l.push_terminal(order("small", OrderStatus::Filled, dec!(1), dec!(1)));
        let s = l.stats();
        assert!(s.volume_saturated);
        assert_eq!(s.total_volume, Decimal::MAX);
        assert_eq!(s.total_orders, 2);
        assert!(!OrderLedger::new(1).stats().volume_saturated);
    }
}
