// ===============================
// src/positions.rs (position lifecycle & PnL)
// ===============================
use chrono::Utc;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::domain::{ManagedPosition, Order, PositionSide, PositionStatus, VenuePosition};
use crate::error::{EngineError, Result};
use crate::ledger::OrderLedger;
use crate::metrics::{OPEN_POSITIONS, PNL_REALIZED};

/// (exit - entry) * qty * leverage, negated for shorts. Zero leverage counts as 1.
/// `None` when the result does not fit in a `Decimal`.
pub fn realized_pnl(side: PositionSide, entry: Decimal, exit: Decimal, qty: Decimal, leverage: Decimal) -> Option<Decimal> {
    let mut diff = exit.checked_sub(entry)?;
    if side == PositionSide::Short {
        diff = -diff;
    }
    let leverage = if leverage.is_zero() { Decimal::ONE } else { leverage };
    diff.checked_mul(qty)?.checked_mul(leverage)
}

fn new_position_id() -> String {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    format!("pos-{}-{}", now, rand::thread_rng().gen::<u32>())
}

/// Position opened by the first fill on a symbol without one.
pub fn open_from_fill(order: &Order, leverage: Decimal) -> ManagedPosition {
    ManagedPosition {
        id: new_position_id(),
        symbol: order.symbol.clone(),
        side: PositionSide::from_entry(order.side),
        entry_price: order.price,
        current_price: order.price,
        quantity: order.filled,
        leverage,
        unrealized_pnl: Decimal::ZERO,
        realized_pnl: Decimal::ZERO,
        entry_time: Utc::now(),
        exit_time: None,
        status: PositionStatus::Open,
        entry_order_id: order.id.clone(),
        exit_order_id: None,
        stop_loss_order_id: None,
        take_profit_order_id: None,
    }
}

/// Apply a confirmed fill to the book. Returns the position that changed, if any.
///
/// * no position -> open one
/// * opposite side -> realize PnL, close and drop from the live map
/// * same side -> untouched (no cost-basis averaging)
///
/// On PnL overflow the book is left as it was and `Overflow` is returned.
pub fn apply_fill(ledger: &mut OrderLedger, order: &Order, leverage: Decimal) -> Result<Option<ManagedPosition>> {
    let Some(existing) = ledger.position(&order.symbol) else {
        let pos = open_from_fill(order, leverage);
        info!(symbol = %pos.symbol, side = ?pos.side, qty = %pos.quantity, px = %pos.entry_price, "position opened");
        ledger.insert_position(pos.clone());
        OPEN_POSITIONS.set(ledger.positions_len() as i64);
        return Ok(Some(pos));
    };

    if existing.side.closing_side() != order.side {
        debug!(symbol = %order.symbol, order_id = %order.id, "same-side fill, position unchanged");
        return Ok(None);
    }

    let total = realized_pnl(existing.side, existing.entry_price, order.price, existing.quantity, existing.leverage)
        .and_then(|pnl| existing.realized_pnl.checked_add(pnl).map(|total| (pnl, total)));
    let Some((pnl, total)) = total else {
        warn!(symbol = %order.symbol, order_id = %order.id, "realized pnl overflowed, position kept open");
        return Err(EngineError::Overflow(format!("realized pnl for {} on fill {}", order.symbol, order.id)));
    };

    let Some(mut pos) = ledger.remove_position(&order.symbol) else { return Ok(None) };
    pos.realized_pnl = total;
    pos.status = PositionStatus::Closed;
    pos.exit_time = Some(Utc::now());
    pos.exit_order_id = Some(order.id.clone());

    info!(symbol = %pos.symbol, pnl = %pnl, exit_px = %order.price, "position closed on fill");
    OPEN_POSITIONS.set(ledger.positions_len() as i64);
    PNL_REALIZED.add(pnl.to_f64().unwrap_or(0.0));
    Ok(Some(pos))
}

/// Copy venue marks onto matching local positions. Returns how many were touched.
pub fn apply_marks(ledger: &mut OrderLedger, marks: &[VenuePosition]) -> usize {
    let mut touched = 0;
    for m in marks {
        if let Some(pos) = ledger.position_mut(&m.symbol) {
            pos.current_price = m.mark_price;
            pos.unrealized_pnl = m.unrealized_pnl;
            touched += 1;
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderKind, OrderStatus, Side, TimeInForce};
    use rust_decimal_macros::dec;

    fn fill(id: &str, side: Side, px: Decimal, qty: Decimal) -> Order {
        Order {
            id: id.into(),
            cl_id: format!("CL-{id}"),
            symbol: "BTC-USD".into(),
            side,
            kind: OrderKind::Market,
            price: px,
            quantity: qty,
            filled: qty,
            status: OrderStatus::Filled,
            stop_price: Decimal::ZERO,
            reduce_only: false,
            time_in_force: TimeInForce::Ioc,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn long_profit() {
        let pnl = realized_pnl(PositionSide::Long, dec!(50000), dec!(51000), dec!(0.1), dec!(1));
        assert_eq!(pnl, Some(dec!(100)));
    }

    #[test]
    fn long_loss() {
        let pnl = realized_pnl(PositionSide::Long, dec!(50000), dec!(49000), dec!(0.1), dec!(1));
        assert_eq!(pnl, Some(dec!(-100)));
    }

    #[test]
    fn short_profit() {
        let pnl = realized_pnl(PositionSide::Short, dec!(50000), dec!(49000), dec!(0.1), dec!(1));
        assert_eq!(pnl, Some(dec!(100)));
    }

    #[test]
    fn leverage_multiplies_and_zero_means_one() {
        assert_eq!(realized_pnl(PositionSide::Long, dec!(100), dec!(110), dec!(2), dec!(3)), Some(dec!(60)));
        assert_eq!(realized_pnl(PositionSide::Long, dec!(100), dec!(110), dec!(2), dec!(0)), Some(dec!(20)));
    }

    #[test]
    fn first_fill_opens_then_opposite_closes() {
        let mut l = OrderLedger::new(10);
        let entry = fill("1", Side::Buy, dec!(50000), dec!(0.1));
        let opened = apply_fill(&mut l, &entry, Decimal::ONE).expect("no overflow").expect("opened");
        assert_eq!(opened.quantity, entry.filled);
        assert_eq!(opened.entry_price, entry.price);
        assert_eq!(opened.side, PositionSide::Long);
        assert_eq!(opened.entry_order_id, "1");

        // same side: no averaging
        assert_eq!(apply_fill(&mut l, &fill("2", Side::Buy, dec!(52000), dec!(0.3)), Decimal::ONE).ok(), Some(None));
        assert_eq!(l.position("BTC-USD").map(|p| p.quantity), Some(dec!(0.1)));

        let closed = apply_fill(&mut l, &fill("3", Side::Sell, dec!(51000), dec!(0.1)), Decimal::ONE).expect("no overflow").expect("closed");
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.realized_pnl, dec!(100));
        assert_eq!(closed.exit_order_id.as_deref(), Some("3"));
        assert!(closed.exit_time.is_some());
        assert!(l.position("BTC-USD").is_none());
    }

    #[test]
    fn marks_only_touch_tracked_symbols() {
        let mut l = OrderLedger::new(10);
        apply_fill(&mut l, &fill("1", Side::Buy, dec!(50000), dec!(0.1)), Decimal::ONE).expect("opened");
        let marks = vec![
            VenuePosition { symbol: "BTC-USD".into(), mark_price: dec!(50500), unrealized_pnl: dec!(50), ..Default::default() },
            VenuePosition { symbol: "ETH-USD".into(), mark_price: dec!(3000), ..Default::default() },
        ];
        assert_eq!(apply_marks(&mut l, &marks), 1);
        let p = l.position("BTC-USD").expect("tracked");
        assert_eq!(p.current_price, dec!(50500));
        assert_eq!(p.unrealized_pnl, dec!(50));
        assert_eq!(p.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn overflowing_pnl_leaves_position_in_place() {
        let mut l = OrderLedger::new(10);
        let huge_px = Decimal::from(1_000_000_000_000_000u64);
        let huge_qty = Decimal::from(100_000_000_000_000u64);
        apply_fill(&mut l, &fill("1", Side::Buy, huge_px, huge_qty), Decimal::ONE).expect("opened");

        let exit = fill("2", Side::Sell, dec!(1), huge_qty);
        let err = apply_fill(&mut l, &exit, Decimal::ONE).unwrap_err();
        assert!(matches!(err, EngineError::Overflow(_)));

        let pos = l.position("BTC-USD").expect("still tracked");
        assert_eq!(pos.status, PositionStatus::Open);
        assert_eq!(pos.realized_pnl, Decimal::ZERO);
        assert!(realized_pnl(PositionSide::Long, huge_px, dec!(1), huge_qty, Decimal::ONE).is_none());
    }
}
