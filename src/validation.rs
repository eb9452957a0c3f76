// ===============================
// src/validation.rs
// ===============================
use crate::domain::OrderRequest;
use crate::error::{EngineError, Result};

/// Pre-submit checks. No I/O; the request is rejected before the venue sees it.
pub fn validate_request(req: Option<&OrderRequest>) -> Result<&OrderRequest> {
    let req = req.ok_or_else(|| EngineError::validation("", "order request is missing"))?;

    if req.symbol.trim().is_empty() {
        return Err(EngineError::validation("", "symbol is required"));
    }
    if req.quantity <= rust_decimal::Decimal::ZERO {
        return Err(EngineError::validation(&req.symbol, "quantity must be positive"));
    }
    if req.kind.requires_price() && req.price <= rust_decimal::Decimal::ZERO {
        return Err(EngineError::validation(&req.symbol, "price must be positive for limit orders"));
    }
    Ok(req)
}
