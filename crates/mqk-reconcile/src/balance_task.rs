//! Balance-reconciliation task.
//!
//! The single-writer periodic loop that keeps `BalanceLedger`'s cached
//! snapshot honest: on each tick, fetch the venue's live balances and feed
//! them through `BalanceLedger::update`. Follows `mqk_worker`'s
//! `spawn_heartbeat`/`spawn_sweeper` idiom — a lease-gated
//! `tokio::time::interval` loop, since more than one process refreshing the
//! same cached balance concurrently would serve no purpose and only add
//! venue call volume.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tracing::{error, info, warn};

use mqk_balance::BalanceLedger;
use mqk_exchange_gateway::ExchangeAdapter;
use mqk_schemas::ExchangeId;
use mqk_worker::{HeartbeatOutcome, RegisterOutcome, WorkerCoordinator};

fn lease_role(exchange: &ExchangeId) -> String {
    format!("balance-reconciliation:{}", exchange.0)
}

/// One fetch-and-update pass. Exposed standalone so callers can also invoke
/// it eagerly (e.g. once at startup before the first interval tick).
pub async fn run_once<A: ExchangeAdapter>(
    adapter: &A,
    exchange: &ExchangeId,
    settle_currency: &str,
    balance: &Arc<StdMutex<BalanceLedger>>,
) -> Result<(), mqk_exchange_gateway::GatewayError> {
    let balances = adapter.fetch_balance().await?;
    let mut ledger = balance.lock().expect("balance ledger poisoned");
    for (currency, entry) in &balances {
        ledger.update(
            exchange,
            currency,
            entry.total_micros,
            entry.available_micros,
            entry.locked_micros,
        );
    }
    if !balances.contains_key(settle_currency) {
        warn!(
            exchange = %exchange.0,
            settle_currency,
            "balance reconciliation fetch did not include the settle currency"
        );
    }
    Ok(())
}

/// Acquire the `"balance-reconciliation:<exchange>"` lease and, while held,
/// refresh `balance` from `adapter.fetch_balance()` on every `interval`.
///
/// Mirrors [`mqk_worker::WorkerCoordinator::spawn_heartbeat`]: the task exits
/// its loop (rather than panicking) once the lease is lost, so a caller can
/// decide whether to retry registration. Returns `None` if another holder
/// already has the lease — the caller should not spawn a duplicate refresher.
pub async fn spawn_balance_reconciliation<A>(
    worker: Arc<WorkerCoordinator>,
    adapter: Arc<A>,
    exchange: ExchangeId,
    settle_currency: String,
    balance: Arc<StdMutex<BalanceLedger>>,
    holder_id: String,
    interval: Duration,
) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>>
where
    A: ExchangeAdapter + 'static,
{
    let role = lease_role(&exchange);
    let (outcome, lease) = worker.register(&role, &holder_id, serde_json::json!({})).await?;
    if outcome != RegisterOutcome::Registered {
        return Ok(None);
    }
    info!(role = %role, holder = %holder_id, "balance reconciliation lease acquired");

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            match worker.heartbeat(&lease).await {
                Ok(HeartbeatOutcome::Ok) => {}
                Ok(HeartbeatOutcome::Expired) => {
                    warn!(role = %lease.role, "balance reconciliation lease lost, stopping");
                    break;
                }
                Err(e) => {
                    error!(error = %e, role = %lease.role, "balance reconciliation heartbeat failed");
                    continue;
                }
            }

            if let Err(e) = run_once(adapter.as_ref(), &exchange, &settle_currency, &balance).await {
                error!(error = %e, exchange = %exchange.0, "balance reconciliation fetch failed");
            }
        }
    });

    Ok(Some(handle))
}
