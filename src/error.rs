// ===============================
// src/error.rs
// ===============================
use std::fmt;
use thiserror::Error;

/// Engine operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Validate,
    Place,
    PlaceStopLoss,
    PlaceTakeProfit,
    Cancel,
    GetOrder,
    GetPositions,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Validate => "validate",
            Operation::Place => "place",
            Operation::PlaceStopLoss => "place_stop_loss",
            Operation::PlaceTakeProfit => "place_take_profit",
            Operation::Cancel => "cancel",
            Operation::GetOrder => "get_order",
            Operation::GetPositions => "get_positions",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Failure reported by a venue call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VenueError {
    #[error("deadline of {0}ms exceeded")]
    Timeout(u64),
    #[error("rejected by venue: {0}")]
    Rejected(String),
    #[error("order not found: {0}")]
    OrderNotFound(String),
    #[error("venue unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("{} {symbol}: {reason}", Operation::Validate)]
    Validation { symbol: String, reason: String },

    #[error("{op} {target}: {source}")]
    Exchange { op: Operation, target: String, #[source] source: VenueError },

    /// Protection failed after the primary was placed; the primary was canceled
    /// unless `rollback` says otherwise.
    #[error("{op} {symbol}: {cause}; primary order {primary_id} {}", rollback_note(.rollback))]
    Rollback {
        op: Operation,
        symbol: String,
        primary_id: String,
        cause: Box<EngineError>,
        rollback: Option<Box<EngineError>>,
    },

    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error("order engine already running")]
    AlreadyRunning,

    /// Decimal arithmetic left the representable range.
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    #[error("reconciliation worker failed: {0}")]
    Worker(String),
}

fn rollback_note(rollback: &Option<Box<EngineError>>) -> String {
    match rollback {
        None => "canceled".to_string(),
        Some(e) => format!("left open, cancel failed: {e}"),
    }
}

impl EngineError {
    pub fn validation(symbol: &str, reason: impl Into<String>) -> Self {
        EngineError::Validation { symbol: symbol.to_string(), reason: reason.into() }
    }

    pub fn exchange(op: Operation, target: &str, source: VenueError) -> Self {
        EngineError::Exchange { op, target: target.to_string(), source }
    }

    /// Operation the error is tagged with, if any.
    pub fn op(&self) -> Option<Operation> {
        match self {
            EngineError::Validation { .. } => Some(Operation::Validate),
            EngineError::Exchange { op, .. } | EngineError::Rollback { op, .. } => Some(*op),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Exchange { source: VenueError::Timeout(_), .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
