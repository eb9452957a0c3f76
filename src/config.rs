// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : order_engine — order & position lifecycle engine in Rust
Module  : config.rs

Summary : Submits orders to a venue, attaches stop-loss / take-profit with
          rollback, reconciles venue state in the background, tracks
          positions and PnL, exposes Prometheus metrics, and records JSONL
          events.
=============================================================================
*/
use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use rust_decimal::Decimal;

/// Engine tuning. `Default` matches the values used when the env is empty.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Deadline applied to every venue call.
    pub api_timeout: Duration,
    /// Period of the reconciliation loop.
    pub reconcile_interval: Duration,
    /// Max terminal orders kept in memory.
    pub history_cap: usize,
    /// Leverage stamped on positions opened from fills.
    pub default_leverage: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(1),
            history_cap: 1000,
            default_leverage: Decimal::ONE,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    pub symbols: Vec<String>,
    pub record_file: Option<String>,
    pub metrics_port: u16,
    /// Delay before the mock venue fills a resting order.
    pub mock_fill_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Limits {
    pub max_positions: usize,
    pub max_notional: Decimal,
    pub px_min: Decimal,
    pub px_max: Decimal,
    pub risk_per_trade_pct: Decimal,
    pub starting_balance: Decimal,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

pub fn load() -> (Args, EngineConfig, Limits) {
    // Pastikan .env dibaca
    let _ = dotenv();

    // SYMBOLS=BTC-USD,ETH-USD
    let symbols: Vec<String> = env::var("SYMBOLS")
        .ok()
        .map(|s| {
            s.split(',')
                .map(|x| x.trim())
                .filter(|x| !x.is_empty())
                .map(|x| x.to_ascii_uppercase())
                .collect()
        })
        .filter(|v: &Vec<String>| !v.is_empty())
        .unwrap_or_else(|| vec!["BTC-USD".to_string()]);

    let args = Args {
        symbols,
        record_file: env::var("RECORD_FILE").ok(),
        metrics_port: env_or("METRICS_PORT", 9898),
        mock_fill_ms: env_or("MOCK_FILL_MS", 1500),
    };

    let defaults = EngineConfig::default();
    let engine = EngineConfig {
        api_timeout: Duration::from_millis(env_or("ORDER_TIMEOUT_MS", defaults.api_timeout.as_millis() as u64)),
        reconcile_interval: Duration::from_millis(env_or(
            "RECONCILE_INTERVAL_MS",
            defaults.reconcile_interval.as_millis() as u64,
        )),
        history_cap: env_or("HISTORY_CAP", defaults.history_cap).max(1),
        default_leverage: env_or("DEFAULT_LEVERAGE", defaults.default_leverage),
    };

    let limits = Limits {
        max_positions: env_or("MAX_POSITIONS", 3),
        max_notional: env_or("MAX_NOTIONAL", Decimal::from(10_000)),
        px_min: env_or("PX_MIN", Decimal::ONE),
        px_max: env_or("PX_MAX", Decimal::from(1_000_000)),
        risk_per_trade_pct: env_or("RISK_PER_TRADE_PCT", Decimal::ONE),
        starting_balance: env_or("STARTING_BALANCE", Decimal::from(10_000)),
    };

    (args, engine, limits)
}
