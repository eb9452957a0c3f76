// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side { Buy, Sell }

impl Side {
    pub fn opposite(&self) -> Side { match self { Side::Buy => Side::Sell, Side::Sell => Side::Buy } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind { Market, Limit, StopLimit }

impl OrderKind {
    /// Limit and stop-limit orders carry a price the venue must honour.
    pub fn requires_price(&self) -> bool { matches!(self, OrderKind::Limit | OrderKind::StopLimit) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    #[default]
    Gtc,
    Ioc,
    Fok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { Created, PartiallyFilled, Filled, Canceled, Rejected, Expired }

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired)
    }
}

/// What the caller wants traded. Consumed once by `OrderEngine::place_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            price: Decimal::ZERO,
            quantity,
            stop_loss: None,
            take_profit: None,
            time_in_force: TimeInForce::Ioc,
            reduce_only: false,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: Side, price: Decimal, quantity: Decimal) -> Self {
        Self { kind: OrderKind::Limit, price, time_in_force: TimeInForce::Gtc, ..Self::market(symbol, side, quantity) }
    }

    pub fn with_stop_loss(mut self, px: Decimal) -> Self { self.stop_loss = Some(px); self }
    pub fn with_take_profit(mut self, px: Decimal) -> Self { self.take_profit = Some(px); self }

    /// Stop-loss price if one was requested and it is non-zero.
    pub fn stop_loss_price(&self) -> Option<Decimal> { self.stop_loss.filter(|p| !p.is_zero()) }
    pub fn take_profit_price(&self) -> Option<Decimal> { self.take_profit.filter(|p| !p.is_zero()) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Venue-assigned id; empty until the venue accepts the order.
    pub id: String,
    pub cl_id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled: Decimal,
    pub status: OrderStatus,
    pub stop_price: Decimal,
    pub reduce_only: bool,
    pub time_in_force: TimeInForce,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent { Created, Filled, PartiallyFilled, Canceled, Rejected, Expired }

impl OrderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEvent::Created => "created",
            OrderEvent::Filled => "filled",
            OrderEvent::PartiallyFilled => "partially_filled",
            OrderEvent::Canceled => "canceled",
            OrderEvent::Rejected => "rejected",
            OrderEvent::Expired => "expired",
        }
    }
}

impl From<OrderStatus> for OrderEvent {
    fn from(s: OrderStatus) -> Self {
        match s {
            OrderStatus::Created => OrderEvent::Created,
            OrderStatus::PartiallyFilled => OrderEvent::PartiallyFilled,
            OrderStatus::Filled => OrderEvent::Filled,
            OrderStatus::Canceled => OrderEvent::Canceled,
            OrderStatus::Rejected => OrderEvent::Rejected,
            OrderStatus::Expired => OrderEvent::Expired,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate { pub order: Order, pub event: OrderEvent, pub ts: DateTime<Utc> }

impl OrderUpdate {
    pub fn new(order: Order, event: OrderEvent) -> Self { Self { order, event, ts: Utc::now() } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide { Long, Short }

impl PositionSide {
    /// buy opens long, sell opens short
    pub fn from_entry(side: Side) -> Self { match side { Side::Buy => PositionSide::Long, Side::Sell => PositionSide::Short } }
    pub fn closing_side(&self) -> Side { match self { PositionSide::Long => Side::Sell, PositionSide::Short => Side::Buy } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus { Open, Closed }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedPosition {
    pub id: String,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub quantity: Decimal,
    pub leverage: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub status: PositionStatus,
    pub entry_order_id: String,
    pub exit_order_id: Option<String>,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
}

/// Venue-side view of a position; only the mark and unrealized PnL are consumed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderStats {
    pub total_orders: usize,
    /// Length of the terminal history, canceled entries included.
    pub filled_orders: usize,
    pub canceled_orders: usize,
    pub rejected_orders: usize,
    pub total_volume: Decimal,
    pub success_rate: f64,
    /// Set when the volume sum overflowed and `total_volume` is clamped.
    pub volume_saturated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event { Order(OrderUpdate), Position(ManagedPosition), Note(String) }
