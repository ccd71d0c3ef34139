//! Typed coordination-core configuration sections, parsed out of the
//! canonical JSON produced by [`crate::load_layered_yaml`].
//!
//! Each section has its own `from_config_json` entry point so a caller that
//! only needs, say, the rate-limiter section (a unit test, a CLI dump
//! command) does not have to satisfy every other section's required fields.
//! [`CoreConfig::from_config_json`] parses all sections together for normal
//! startup use.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use mqk_schemas::{
    BreakevenConfig, Micros, PartialTpRung, ProfitLockRung, ProtectionPlan, TrailingConfig,
    MICROS_SCALE,
};

fn to_micros(fraction: f64) -> i64 {
    (fraction * MICROS_SCALE as f64).round() as i64
}

/// One named risk profile (`standard`, `conservative`, `very_conservative`, ...).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RiskProfileConfig {
    /// Multiplier applied to the base sized quantity; in `(0, 1]`.
    pub risk_multiplier: f64,
}

/// Asset-category classification used by RiskEvaluator step 2.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AssetCategoryConfig {
    /// Symbols belonging to this category (exact match on the signal symbol).
    pub symbols: Vec<String>,
    pub multiplier: f64,
    pub max_leverage: u32,
    /// If `true`, no signal in this category is ever accepted (e.g. a
    /// temporarily disallowed listing).
    #[serde(default)]
    pub disallowed: bool,
}

/// Defaults used to derive a [`ProtectionPlan`] when a signal doesn't
/// override them.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ProtectionDefaultsConfig {
    pub initial_stop_distance_pct: f64,
    pub initial_take_distance_pct: f64,
    pub trailing_activation_pct: Option<f64>,
    pub trailing_distance_pct: Option<f64>,
    pub breakeven_activation_pct: Option<f64>,
    pub breakeven_offset_pct: Option<f64>,
    /// `(trigger_pct, locked_pct)` pairs, ascending by trigger.
    #[serde(default)]
    pub profit_lock_ladder: Vec<(f64, f64)>,
    /// `(trigger_pct, close_fraction)` pairs, ascending by trigger; fractions
    /// sum to at most 1.0.
    #[serde(default)]
    pub partial_tp_ladder: Vec<(f64, f64)>,
    #[serde(default = "default_max_protection_updates")]
    pub max_protection_updates: u32,
}

fn default_max_protection_updates() -> u32 {
    5
}

impl ProtectionDefaultsConfig {
    /// Convert the float-percent config into the fixed-point [`ProtectionPlan`]
    /// the SL/TP engine consumes.
    pub fn to_protection_plan(&self) -> ProtectionPlan {
        ProtectionPlan {
            initial_stop_distance_pct_micros: to_micros(self.initial_stop_distance_pct),
            initial_take_distance_pct_micros: to_micros(self.initial_take_distance_pct),
            trailing: match (self.trailing_activation_pct, self.trailing_distance_pct) {
                (Some(a), Some(d)) => Some(TrailingConfig {
                    activation_profit_pct_micros: to_micros(a),
                    trailing_distance_pct_micros: to_micros(d),
                }),
                _ => None,
            },
            breakeven: match (self.breakeven_activation_pct, self.breakeven_offset_pct) {
                (Some(a), Some(o)) => Some(BreakevenConfig {
                    activation_profit_pct_micros: to_micros(a),
                    offset_pct_micros: to_micros(o),
                }),
                _ => None,
            },
            profit_lock_ladder: self
                .profit_lock_ladder
                .iter()
                .map(|(trigger, locked)| ProfitLockRung {
                    trigger_profit_pct_micros: to_micros(*trigger),
                    locked_profit_pct_micros: to_micros(*locked),
                })
                .collect(),
            partial_tp_ladder: self
                .partial_tp_ladder
                .iter()
                .map(|(trigger, fraction)| PartialTpRung {
                    trigger_profit_pct_micros: to_micros(*trigger),
                    close_fraction_micros: to_micros(*fraction),
                })
                .collect(),
            max_protection_updates: self.max_protection_updates,
        }
    }
}

/// Per-(exchange, endpoint-class) sliding-window limit.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EndpointLimitConfig {
    pub endpoint_class: String,
    pub window_seconds: u32,
    pub limit_weight: u32,
}

/// Rate-limiter configuration for one exchange: per-class buckets plus a
/// cross-endpoint global bucket.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RateLimiterConfig {
    pub endpoint_limits: Vec<EndpointLimitConfig>,
    pub global_window_seconds: u32,
    pub global_limit_weight: u32,
    /// Safety margin applied to every limit, e.g. `0.9` for 90% of nominal.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
}

fn default_safety_margin() -> f64 {
    0.9
}

/// Credentials as env var NAMES — never the values. Config YAML stores only
/// these names; `mqk-config::secrets` resolves them from the process
/// environment at startup. Names must embed the exchange id so a
/// misconfiguration cannot wire one venue's keys into another's adapter.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ExchangeCredentialEnvNames {
    pub api_key_env: String,
    pub api_secret_env: String,
}

/// One configured venue.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub ws_url: String,
    pub hedge_mode: bool,
    pub min_notional_micros: Micros,
    pub credentials_env: ExchangeCredentialEnvNames,
    pub rate_limits: RateLimiterConfig,
}

/// WorkerCoordinator timing knobs.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct WorkerCoordinatorConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u32,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u32,
}

fn default_heartbeat_interval() -> u32 {
    30
}

fn default_heartbeat_timeout() -> u32 {
    60
}

impl Default for WorkerCoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat_interval(),
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
        }
    }
}

/// Portfolio-level admission thresholds consumed by RiskEvaluator step 5.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PortfolioLimitsConfig {
    pub max_positions: u32,
    pub max_positions_per_direction: u32,
    pub max_total_risk_pct: f64,
    pub daily_loss_limit_pct: f64,
}

/// All typed sections of the trading-coordination-core configuration,
/// assembled at startup from a single [`crate::LoadedConfig`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CoreConfig {
    pub min_confidence: f64,
    /// Fraction of `risk_basis_balance_micros` targeted as risk on one
    /// trade, before the signal's risk-profile and asset-category
    /// multipliers are applied (§4.F step 3).
    pub risk_per_trade_pct: f64,
    pub dedup_window_seconds: u32,
    pub risk_profiles: BTreeMap<String, RiskProfileConfig>,
    pub asset_categories: BTreeMap<String, AssetCategoryConfig>,
    pub protection_defaults: ProtectionDefaultsConfig,
    pub portfolio_limits: PortfolioLimitsConfig,
    #[serde(default)]
    pub worker_coordinator: WorkerCoordinatorConfig,
    pub exchanges: BTreeMap<String, ExchangeConfig>,
}

impl CoreConfig {
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let core = config_json
            .pointer("/coordination_core")
            .context("config missing /coordination_core section")?;
        serde_json::from_value(core.clone()).context("failed to parse /coordination_core section")
    }

    /// Classify a symbol into its configured asset category, if any.
    pub fn category_for_symbol(&self, symbol: &str) -> Option<(&str, &AssetCategoryConfig)> {
        self.asset_categories
            .iter()
            .find(|(_, cat)| cat.symbols.iter().any(|s| s == symbol))
            .map(|(name, cat)| (name.as_str(), cat))
    }
}
