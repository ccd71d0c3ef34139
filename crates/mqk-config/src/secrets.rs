//! Exchange credential resolution.
//!
//! This module is the **single source of truth** for runtime secret
//! resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** per exchange (e.g.
//!   `"MQK_BYBIT_API_KEY"`), never values.
//! - At startup, callers invoke [`resolve_exchange_credentials`] once per
//!   configured exchange. The returned [`ResolvedExchangeCredentials`] is
//!   passed into the exchange adapter constructor; never scatter
//!   `std::env::var` calls across the codebase.
//! - `Debug` impls **redact** values.
//! - Error messages reference the env var **NAME**, never the value.
//! - Env var names must embed the exchange id (case-insensitively), so a
//!   misconfigured YAML cannot wire one venue's keys into another's adapter —
//!   this is checked structurally, not just by convention.

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::types::ExchangeCredentialEnvNames;

/// Resolved API key/secret for one exchange. Required for every exchange the
/// core is configured to trade on — there is no "paper" exemption here
/// because paper/live mode selection is an `ExchangeAdapter` implementation
/// choice, not a credential-resolution concern.
#[derive(Clone)]
pub struct ResolvedExchangeCredentials {
    pub exchange_id: String,
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for ResolvedExchangeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedExchangeCredentials")
            .field("exchange_id", &self.exchange_id)
            .field("api_key", &"<REDACTED>")
            .field("api_secret", &"<REDACTED>")
            .finish()
    }
}

/// Resolve a named environment variable.
/// Returns `None` if the variable is unset or its value is blank.
/// Never returns the value in an error path — callers report the NAME only.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Enforce that an env var name embeds the exchange id token, preventing one
/// venue's credentials from being accidentally wired into another's adapter
/// via a copy-pasted config block.
fn check_name_embeds_exchange_id(var_name: &str, exchange_id: &str) -> Result<()> {
    let token = exchange_id.to_ascii_uppercase();
    if !var_name.to_ascii_uppercase().contains(&token) {
        bail!(
            "credentials_env var '{var_name}' must include exchange id token '{token}' \
             to prevent cross-exchange credential wiring"
        );
    }
    Ok(())
}

/// Resolve the API key/secret for one exchange, given its
/// `credentials_env` section from [`crate::ExchangeConfig`].
///
/// # Errors
/// Returns `Err` naming the missing env var **NAME** (never the value) if
/// either variable is unset or blank, or if a name does not embed the
/// exchange id token.
pub fn resolve_exchange_credentials(
    exchange_id: &str,
    env_names: &ExchangeCredentialEnvNames,
) -> Result<ResolvedExchangeCredentials> {
    check_name_embeds_exchange_id(&env_names.api_key_env, exchange_id)?;
    check_name_embeds_exchange_id(&env_names.api_secret_env, exchange_id)?;

    let api_key = resolve_env(&env_names.api_key_env).with_context(|| {
        format!(
            "SECRETS_MISSING exchange={exchange_id}: required env var '{}' (api_key) is not set or empty",
            env_names.api_key_env
        )
    })?;
    let api_secret = resolve_env(&env_names.api_secret_env).with_context(|| {
        format!(
            "SECRETS_MISSING exchange={exchange_id}: required env var '{}' (api_secret) is not set or empty",
            env_names.api_secret_env
        )
    })?;

    Ok(ResolvedExchangeCredentials {
        exchange_id: exchange_id.to_string(),
        api_key,
        api_secret,
    })
}

/// Resolve credentials for every exchange in the parsed `CoreConfig`.
pub fn resolve_all(config_json: &Value) -> Result<Vec<ResolvedExchangeCredentials>> {
    let core = crate::CoreConfig::from_config_json(config_json)?;
    core.exchanges
        .iter()
        .map(|(id, ex)| resolve_exchange_credentials(id, &ex.credentials_env))
        .collect()
}
