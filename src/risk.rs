// ===============================
// src/risk.rs
// ===============================
use std::sync::Mutex;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::config::Limits;
use crate::domain::{ManagedPosition, OrderRequest};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RiskError {
    #[error("maximum number of positions ({0}) reached")]
    MaxPositions(usize),
    #[error("notional {notional} exceeds limit {limit}")]
    Notional { notional: Decimal, limit: Decimal },
    #[error("price {0} out of band")]
    PriceBand(Decimal),
    #[error("stop loss is required")]
    MissingStopLoss,
}

/// Pre-trade policy consulted by whoever drives the engine. The engine itself
/// never calls this.
pub trait RiskPolicy: Send + Sync {
    /// `Err(reason)` when trading is paused.
    fn can_trade(&self) -> Result<(), String>;

    fn validate_order(&self, req: &OrderRequest, open_positions: &[ManagedPosition]) -> Result<(), RiskError>;

    /// Quantity risking `risk_per_trade_pct` of `balance` between entry and stop.
    fn calculate_position_size(&self, entry: Decimal, stop: Decimal, balance: Decimal) -> Decimal;

    fn current_balance(&self) -> Decimal;
}

/// Static limits from env plus a running balance.
#[derive(Debug)]
pub struct LimitsPolicy {
    lim: Limits,
    balance: Mutex<Decimal>,
}

impl LimitsPolicy {
    pub fn new(lim: Limits) -> Self {
        let balance = Mutex::new(lim.starting_balance);
        Self { lim, balance }
    }

    /// Fold a realized PnL into the balance.
    pub fn record_pnl(&self, pnl: Decimal) {
        *self.balance.lock().unwrap_or_else(|e| e.into_inner()) += pnl;
    }
}

impl RiskPolicy for LimitsPolicy {
    fn can_trade(&self) -> Result<(), String> {
        if self.current_balance() <= Decimal::ZERO {
            return Err("account balance depleted".to_string());
        }
        Ok(())
    }

    fn validate_order(&self, req: &OrderRequest, open_positions: &[ManagedPosition]) -> Result<(), RiskError> {
        // 1) Jumlah posisi
        if open_positions.len() >= self.lim.max_positions {
            return Err(RiskError::MaxPositions(self.lim.max_positions));
        }

        // 2) Price band (market order tanpa harga dilewati)
        if !req.price.is_zero() && (req.price < self.lim.px_min || req.price > self.lim.px_max) {
            return Err(RiskError::PriceBand(req.price));
        }

        // 3) Notional limit (px * qty)
        let notional = req.price * req.quantity;
        if notional > self.lim.max_notional {
            return Err(RiskError::Notional { notional, limit: self.lim.max_notional });
        }

        // 4) Wajib ada stop loss
        if req.stop_loss_price().is_none() {
            return Err(RiskError::MissingStopLoss);
        }
        Ok(())
    }

    fn calculate_position_size(&self, entry: Decimal, stop: Decimal, balance: Decimal) -> Decimal {
        let distance = (entry - stop).abs();
        if distance.is_zero() || entry.is_zero() {
            warn!(%entry, %stop, "position size: zero stop distance");
            return Decimal::ZERO;
        }
        let risk_amount = balance * self.lim.risk_per_trade_pct / Decimal::ONE_HUNDRED;
        let size = risk_amount / distance;
        size.min(self.lim.max_notional / entry)
    }

    fn current_balance(&self) -> Decimal { *self.balance.lock().unwrap_or_else(|e| e.into_inner()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    fn limits() -> Limits {
        Limits {
            max_positions: 1,
            max_notional: dec!(10000),
            px_min: dec!(1),
            px_max: dec!(1000000),
            risk_per_trade_pct: dec!(1),
            starting_balance: dec!(10000),
        }
    }

    #[test]
    fn requires_stop_loss_and_notional_headroom() {
        let p = LimitsPolicy::new(limits());
        let base = OrderRequest::limit("BTC-USD", Side::Buy, dec!(50000), dec!(0.1));
        assert_eq!(p.validate_order(&base, &[]), Err(RiskError::MissingStopLoss));
        assert!(p.validate_order(&base.clone().with_stop_loss(dec!(49000)), &[]).is_ok());

        let big = OrderRequest::limit("BTC-USD", Side::Buy, dec!(50000), dec!(1)).with_stop_loss(dec!(49000));
        assert!(matches!(p.validate_order(&big, &[]), Err(RiskError::Notional { .. })));
    }

    #[test]
    fn size_is_risk_over_stop_distance_capped_by_notional() {
        let p = LimitsPolicy::new(limits());
        // 1% of 10000 = 100 risked over a 1000 stop distance
        assert_eq!(p.calculate_position_size(dec!(50000), dec!(49000), dec!(10000)), dec!(0.1));
        // 100 / 1 = 100 units, capped at 10000 / 500 = 20
        assert_eq!(p.calculate_position_size(dec!(500), dec!(499), dec!(10000)), dec!(20));
        assert_eq!(p.calculate_position_size(dec!(100), dec!(100), dec!(10000)), Decimal::ZERO);
    }

    #[test]
    fn balance_tracks_recorded_pnl() {
        let p = LimitsPolicy::new(limits());
        p.record_pnl(dec!(-10000));
        assert_eq!(p.current_balance(), Decimal::ZERO);
        assert!(p.can_trade().is_err());
    }
}
