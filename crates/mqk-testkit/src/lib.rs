//! Shared fixtures for scenario tests exercising the coordination core
//! end to end: a sample `coordination_core` config, signal builders, and a
//! `PaperExchangeAdapter`-backed harness wiring SignalDeduplicator ->
//! RiskEvaluator -> OrderExecutor -> PositionMonitor the same way
//! `TradingCoordinator::ingest_signal` does, without requiring a live
//! Postgres connection for the tests that don't need one.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use mqk_balance::BalanceLedger;
use mqk_config::CoreConfig;
use mqk_exchange_gateway::{BalanceEntry, PaperExchangeAdapter};
use mqk_execution::OrderExecutor;
use mqk_ratelimiter::RateLimiter;
use mqk_schemas::{ExchangeId, MlHints, Side, Signal, SlTp, MICROS_SCALE};

/// A `coordination_core` config section exercising every field the sample
/// signals/scenarios need: one exchange (`bybit`, hedge mode on), a single
/// `standard` risk profile, no asset categories, and a protection plan with
/// a partial-TP ladder, trailing stop, and breakeven leg.
pub fn sample_core_config_json() -> Value {
    serde_json::json!({
        "coordination_core": {
            "min_confidence": 0.6,
            "risk_per_trade_pct": 0.01,
            "dedup_window_seconds": 300,
            "risk_profiles": {
                "standard": {"risk_multiplier": 1.0}
            },
            "asset_categories": {},
            "protection_defaults": {
                "initial_stop_distance_pct": 0.03,
                "initial_take_distance_pct": 0.05,
                "trailing_activation_pct": 0.01,
                "trailing_distance_pct": 0.005,
                "breakeven_activation_pct": 0.015,
                "breakeven_offset_pct": 0.001,
                "profit_lock_ladder": [],
                "partial_tp_ladder": [[0.02, 0.3]]
            },
            "portfolio_limits": {
                "max_positions": 10,
                "max_positions_per_direction": 5,
                "max_total_risk_pct": 0.2,
                "daily_loss_limit_pct": 0.05
            },
            "worker_coordinator": {
                "heartbeat_interval_seconds": 30,
                "heartbeat_timeout_seconds": 60
            },
            "exchanges": {
                "bybit": {
                    "base_url": "https://api.bybit.example",
                    "ws_url": "wss://stream.bybit.example",
                    "hedge_mode": true,
                    "min_notional_micros": 5_000_000,
                    "credentials_env": {
                        "api_key_env": "MQK_BYBIT_API_KEY",
                        "api_secret_env": "MQK_BYBIT_API_SECRET"
                    },
                    "rate_limits": {
                        "endpoint_limits": [
                            {"endpoint_class": "order", "window_seconds": 60, "limit_weight": 100},
                            {"endpoint_class": "position", "window_seconds": 60, "limit_weight": 100}
                        ],
                        "global_window_seconds": 60,
                        "global_limit_weight": 1200
                    }
                }
            }
        }
    })
}

pub fn sample_core_config() -> CoreConfig {
    CoreConfig::from_config_json(&sample_core_config_json()).expect("sample config parses")
}

pub fn exchange() -> ExchangeId {
    ExchangeId::from("bybit")
}

/// A well-formed long signal on BTCUSDT at a 50k entry, 3%/5% SL/TP, high
/// enough confidence to clear the sample config's 0.6 floor.
pub fn sample_signal(strategy_id: &str, ts: DateTime<Utc>) -> Signal {
    Signal {
        symbol: "BTCUSDT".to_string(),
        side: Side::Long,
        strategy_id: strategy_id.to_string(),
        suggested_entry_price_micros: 50_000 * MICROS_SCALE,
        stop_loss: SlTp::Percent { pct_micros: 30_000 },
        take_profit: SlTp::Percent { pct_micros: 50_000 },
        confidence: 0.8,
        producer_ts: ts,
        leverage: Some(1),
        risk_profile: None,
        ml_hints: None,
    }
}

pub fn sample_signal_with_ml(strategy_id: &str, ts: DateTime<Utc>, ml_confidence: f64) -> Signal {
    let mut sig = sample_signal(strategy_id, ts);
    sig.ml_hints = Some(MlHints {
        profit_probability: None,
        loss_probability: None,
        confidence: Some(ml_confidence),
    });
    sig
}

/// A funded, price-seeded `PaperExchangeAdapter` for `exchange()`/`BTCUSDT`,
/// plus the `BalanceLedger`/`RateLimiter` an `OrderExecutor` needs alongside
/// it. Mirrors the fixtures each crate's own unit tests already build, kept
/// here once so scenario tests don't re-derive them.
pub struct PaperHarness {
    pub adapter: Arc<PaperExchangeAdapter>,
    pub executor: OrderExecutor<PaperExchangeAdapter>,
    pub balance: Arc<StdMutex<BalanceLedger>>,
    pub rate_limiter: Arc<StdMutex<RateLimiter>>,
}

impl PaperHarness {
    pub fn new(starting_balance_usdt: i64) -> Self {
        let ex = exchange();
        let adapter = Arc::new(PaperExchangeAdapter::new(ex.clone()));
        adapter.set_mark_price("BTCUSDT", 50_000 * MICROS_SCALE);
        adapter.seed_balance(
            "USDT",
            BalanceEntry {
                total_micros: starting_balance_usdt * MICROS_SCALE,
                available_micros: starting_balance_usdt * MICROS_SCALE,
                locked_micros: 0,
            },
        );

        let mut ledger = BalanceLedger::new();
        ledger.update(
            &ex,
            "USDT",
            starting_balance_usdt * MICROS_SCALE,
            starting_balance_usdt * MICROS_SCALE,
            0,
        );

        let mut rl = RateLimiter::new();
        rl.configure_exchange(
            ex.clone(),
            60,
            1200,
            1.0,
            [
                (mqk_schemas::EndpointClass::Order, 60, 100),
                (mqk_schemas::EndpointClass::Position, 60, 100),
            ],
        );

        let executor = OrderExecutor::new(adapter.clone());
        Self {
            adapter,
            executor,
            balance: Arc::new(StdMutex::new(ledger)),
            rate_limiter: Arc::new(StdMutex::new(rl)),
        }
    }
}

/// A run id for scenario tests that need one to stand in for a process
/// lifetime's worth of audit events.
pub fn run_id() -> Uuid {
    Uuid::new_v4()
}
