// ===============================
// src/lib.rs
// ===============================
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod positions;
mod reconcile;
pub mod recorder;
pub mod risk;
pub mod validation;
pub mod venue;

pub use config::EngineConfig;
pub use domain::{
    ManagedPosition, Order, OrderEvent, OrderKind, OrderRequest, OrderStats, OrderStatus, OrderUpdate, PositionSide,
    PositionStatus, Side, TimeInForce, VenuePosition,
};
pub use engine::OrderEngine;
pub use error::{EngineError, Operation, VenueError};
pub use venue::{MockVenue, Venue};
