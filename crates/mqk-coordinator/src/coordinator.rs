//! §4.J TradingCoordinator: the composition root for one exchange
//! connection. Owns the lease, the signal pipeline, and reports into the
//! shared `AppState` the HTTP surface serves from.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex as StdMutex,
};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use mqk_audit::AuditWriter;
use mqk_balance::BalanceLedger;
use mqk_config::{CoreConfig, ExchangeConfig};
use mqk_dedup::{AdmitDecision, SignalDeduplicator};
use mqk_exchange_gateway::ExchangeAdapter;
use mqk_execution::{ExecutionError, OrderExecutor};
use mqk_position_monitor::PositionMonitor;
use mqk_ratelimiter::RateLimiter;
use mqk_reconcile::{ArmState, BrokerSnapshot, LocalSnapshot};
use mqk_risk::RiskRejection;
use mqk_schemas::{ExchangeId, Position, ProtectionPlan, Side, Signal};
use mqk_worker::{HeartbeatOutcome, LeaseHandle, RegisterOutcome, WorkerCoordinator};

use crate::context::resolve_risk_context;
use crate::events::LifecycleEvent;
use crate::portfolio::PortfolioState;
use crate::state::AppState;
use crate::status::{ExchangeStatus, RateBucketStatus, RecentRejection};

/// One signal's outcome through the whole pipeline.
#[derive(Debug)]
pub enum IngestOutcome {
    Accepted { position_id: Uuid },
    RejectedDuplicate,
    RejectedByRisk(RiskRejection),
    RejectedByVenue(ExecutionError),
    /// The system is disarmed (boot default, manual disarm, or a reconcile
    /// drift halt) — no new entries are submitted until an operator re-arms.
    RejectedDisarmed(mqk_reconcile::DisarmReason),
}

/// The lease role name every coordinator for a given exchange registers
/// under — one live writer per exchange, never per process.
fn lease_role(exchange: &ExchangeId) -> String {
    format!("trading-coordinator:{}", exchange.0)
}

pub struct TradingCoordinator<A: ExchangeAdapter> {
    exchange: ExchangeId,
    core_config: CoreConfig,
    exchange_config: ExchangeConfig,
    settle_currency: String,
    hedge_mode: bool,
    protection_plan: ProtectionPlan,
    dedup: AsyncMutex<SignalDeduplicator>,
    balance: Arc<StdMutex<BalanceLedger>>,
    rate_limiter: Arc<StdMutex<RateLimiter>>,
    executor: OrderExecutor<A>,
    monitor: Arc<PositionMonitor<A>>,
    portfolio: PortfolioState,
    worker: Arc<WorkerCoordinator>,
    lease: AsyncMutex<Option<LeaseHandle>>,
    /// System-wide armed/disarmed flag (fail-closed on every boot). Checked
    /// at the top of `ingest_signal`; the sole chokepoint.
    arm: StdMutex<ArmState>,
    audit: StdMutex<AuditWriter>,
    app_state: Arc<AppState>,
    db_pool: PgPool,
    run_id: Uuid,
    recent_rejections: StdMutex<std::collections::VecDeque<RecentRejection>>,
    /// Count of reservations currently HELD (reserved, not yet committed or
    /// released). `BalanceLedger` exposes the reserved *amount*, not a
    /// count, so this is tracked alongside it for the §6 status surface.
    open_reservations: AtomicU32,
}

const RECENT_REJECTIONS_CAP: usize = 50;

impl<A: ExchangeAdapter> TradingCoordinator<A> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: ExchangeId,
        core_config: CoreConfig,
        exchange_config: ExchangeConfig,
        settle_currency: String,
        executor: OrderExecutor<A>,
        monitor: Arc<PositionMonitor<A>>,
        worker: Arc<WorkerCoordinator>,
        balance: Arc<StdMutex<BalanceLedger>>,
        rate_limiter: Arc<StdMutex<RateLimiter>>,
        audit: AuditWriter,
        app_state: Arc<AppState>,
        db_pool: PgPool,
        risk_basis_balance_micros: i64,
    ) -> Self {
        let hedge_mode = exchange_config.hedge_mode;
        let protection_plan = core_config.protection_defaults.to_protection_plan();
        let dedup_window = core_config.dedup_window_seconds;
        Self {
            exchange,
            core_config,
            exchange_config,
            settle_currency,
            hedge_mode,
            protection_plan,
            dedup: AsyncMutex::new(SignalDeduplicator::new(dedup_window)),
            balance,
            rate_limiter,
            executor,
            monitor,
            portfolio: PortfolioState::new(risk_basis_balance_micros),
            worker,
            lease: AsyncMutex::new(None),
            arm: StdMutex::new(ArmState::boot(None)),
            audit: StdMutex::new(audit),
            app_state,
            db_pool,
            run_id: Uuid::new_v4(),
            recent_rejections: StdMutex::new(std::collections::VecDeque::new()),
            open_reservations: AtomicU32::new(0),
        }
    }

    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    /// §4.J step 1: acquire the single-writer lease for this exchange.
    /// Returns `false` if another process already holds it — the caller
    /// must not start the signal pipeline in that case.
    pub async fn acquire_lease(&self, candidate_id: &str) -> anyhow::Result<bool> {
        let (outcome, handle) = self
            .worker
            .register(&lease_role(&self.exchange), candidate_id, serde_json::json!({}))
            .await?;
        let acquired = outcome == RegisterOutcome::Registered;
        if acquired {
            *self.lease.lock().await = Some(handle);
            self.record_event(LifecycleEvent::LeaseAcquired {
                exchange: self.exchange.clone(),
                ts: Utc::now(),
            });
        }
        Ok(acquired)
    }

    /// Spawns the heartbeat loop for the held lease. Returns the watch
    /// receiver so the caller can react if the lease is lost mid-run.
    pub async fn spawn_lease_heartbeat(
        self: &Arc<Self>,
        interval: std::time::Duration,
    ) -> Option<(tokio::task::JoinHandle<()>, tokio::sync::watch::Receiver<HeartbeatOutcome>)> {
        let lease = self.lease.lock().await.clone()?;
        Some(self.worker.clone().spawn_heartbeat(lease, interval))
    }

    /// Current arm state.
    pub fn arm_state(&self) -> ArmState {
        self.arm.lock().expect("arm state poisoned").clone()
    }

    /// Explicit operator arm. Callers MUST have passed
    /// [`mqk_reconcile::check_arm_gate`] against a fresh local/broker
    /// snapshot comparison before calling this — this method does not
    /// re-verify the gate itself.
    pub fn manual_arm(&self) {
        *self.arm.lock().expect("arm state poisoned") = ArmState::arm();
    }

    /// Explicit operator disarm.
    pub fn manual_disarm(&self) {
        *self.arm.lock().expect("arm state poisoned") = ArmState::manual_disarm();
    }

    /// Builds a [`LocalSnapshot`] of this exchange's open positions (orders
    /// are left empty — `PositionMonitor` does not track broker-side order
    /// identifiers in enough detail to diff them, only positions) for a
    /// drift check against a freshly fetched [`BrokerSnapshot`].
    async fn local_position_snapshot(&self) -> LocalSnapshot {
        let mut snapshot = LocalSnapshot::empty();
        for (symbol, side, qty_micros) in self.monitor.open_position_snapshot().await {
            let signed = match side {
                Side::Long => qty_micros,
                Side::Short => -qty_micros,
            };
            snapshot.positions.insert(symbol, signed);
        }
        snapshot
    }

    /// §4.C / §4.K periodic drift check: fetch the venue's live positions,
    /// compare against what `PositionMonitor` believes is open, and react to
    /// [`mqk_reconcile::DriftAction::HaltAndDisarm`] by disarming — the
    /// runtime must separately stop order submission, which it does simply
    /// by the disarmed flag now being set (`ingest_signal` checks it first).
    pub async fn run_reconcile_tick(&self, now: DateTime<Utc>) -> mqk_reconcile::DriftAction {
        let local = self.local_position_snapshot().await;
        let broker = match self.executor.adapter().fetch_positions().await {
            Ok(positions) => {
                let mut snap = BrokerSnapshot::empty();
                snap.fetched_at_ms = now.timestamp_millis();
                for p in positions {
                    let signed = match p.side {
                        Side::Long => p.quantity_micros,
                        Side::Short => -p.quantity_micros,
                    };
                    snap.positions.insert(p.symbol, signed);
                }
                snap
            }
            Err(e) => {
                tracing::error!(error = %e, exchange = %self.exchange.0, "reconcile tick: fetch_positions failed");
                return mqk_reconcile::DriftAction::Continue;
            }
        };

        let action = mqk_reconcile::reconcile_tick(&local, &broker);
        if let Some(next) = ArmState::from_drift_action(&action) {
            tracing::warn!(exchange = %self.exchange.0, "reconcile drift detected, disarming");
            *self.arm.lock().expect("arm state poisoned") = next;
            self.record_event(LifecycleEvent::Disarmed {
                exchange: self.exchange.clone(),
                reason: "reconcile drift".to_string(),
                ts: now,
            });
        }
        action
    }

    /// §4.C: spawn the balance-reconciliation task for this exchange.
    /// `A: 'static` so the adapter handle can be moved into the spawned
    /// task. Returns `None` without spawning if another process already
    /// holds the lease (`TradingCoordinator` is still fully usable — it
    /// just won't be the one refreshing the cached balance).
    pub async fn spawn_balance_reconciliation(
        self: &Arc<Self>,
        candidate_id: &str,
        interval: std::time::Duration,
    ) -> anyhow::Result<Option<tokio::task::JoinHandle<()>>>
    where
        A: 'static,
    {
        mqk_reconcile::spawn_balance_reconciliation(
            self.worker.clone(),
            self.executor.adapter_handle(),
            self.exchange.clone(),
            self.settle_currency.clone(),
            self.balance.clone(),
            candidate_id.to_string(),
            interval,
        )
        .await
    }

    /// §4.J step 4: release the lease during an orderly shutdown.
    pub async fn release_lease(&self) -> anyhow::Result<()> {
        if let Some(lease) = self.lease.lock().await.take() {
            self.worker.release(&lease).await?;
            self.record_event(LifecycleEvent::LeaseLost {
                exchange: self.exchange.clone(),
                ts: Utc::now(),
            });
        }
        Ok(())
    }

    /// §4.J step 2: the full signal-ingestion pipeline. Dedup, risk sizing,
    /// order submission, and protection attachment — in that order,
    /// stopping at the first rejection.
    pub async fn ingest_signal(&self, signal: Signal, attempt: u32, now: DateTime<Utc>) -> IngestOutcome {
        if let ArmState::Disarmed { reason } = self.arm_state() {
            self.record_event(LifecycleEvent::SignalRejectedDisarmed {
                exchange: self.exchange.clone(),
                symbol: signal.symbol.clone(),
                reason: format!("{reason:?}"),
                ts: now,
            });
            return IngestOutcome::RejectedDisarmed(reason);
        }

        {
            let mut dedup = self.dedup.lock().await;
            if dedup.admit(&signal, now) == AdmitDecision::RejectedDuplicate {
                self.record_event(LifecycleEvent::SignalRejectedDuplicate {
                    exchange: self.exchange.clone(),
                    symbol: signal.symbol.clone(),
                    ts: now,
                });
                return IngestOutcome::RejectedDuplicate;
            }
        }

        let ctx = resolve_risk_context(&self.core_config, &self.exchange_config, &signal);
        let snapshot = self.portfolio.snapshot();
        let intent = match mqk_risk::evaluate(&signal, &ctx, &snapshot) {
            Ok(intent) => intent,
            Err(rejection) => {
                self.note_rejection(&signal.symbol, &rejection.to_string(), now);
                self.record_event(LifecycleEvent::SignalRejectedByRisk {
                    exchange: self.exchange.clone(),
                    symbol: signal.symbol.clone(),
                    reason: rejection.to_string(),
                    ts: now,
                });
                return IngestOutcome::RejectedByRisk(rejection);
            }
        };

        self.record_event(LifecycleEvent::SignalAccepted {
            exchange: self.exchange.clone(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            ts: now,
        });

        let fingerprint = mqk_schemas::fingerprint::fingerprint_signal(&signal);
        let fill = match self
            .executor
            .submit_entry(
                &signal,
                &intent,
                &self.settle_currency,
                self.hedge_mode,
                &self.balance,
                &self.rate_limiter,
                Some(&self.db_pool),
                fingerprint,
                attempt,
                now,
            )
            .await
        {
            Ok(fill) => fill,
            Err(err) => {
                self.note_rejection(&signal.symbol, &err.to_string(), now);
                self.record_event(LifecycleEvent::EntryRejectedByVenue {
                    exchange: self.exchange.clone(),
                    symbol: signal.symbol.clone(),
                    reason: err.to_string(),
                    ts: now,
                });
                return IngestOutcome::RejectedByVenue(err);
            }
        };

        self.open_reservations.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.executor.commit_reservation(&self.balance, fill.reservation_id) {
            tracing::error!(error = %e, order_id = %fill.order.id, "commit_reservation failed after fill");
        }
        self.open_reservations.fetch_sub(1, Ordering::Relaxed);

        let position = Position {
            id: Uuid::new_v4(),
            exchange: self.exchange.clone(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            entry_price_micros: fill.order.avg_fill_price_micros.unwrap_or(intent.effective_stop_loss_micros),
            current_qty_micros: fill.order.filled_qty_micros,
            initial_qty_micros: fill.order.filled_qty_micros,
            leverage: intent.leverage,
            active_sl_micros: Some(intent.effective_stop_loss_micros),
            active_tp_micros: Some(intent.effective_take_profit_micros),
            highest_favourable_pct_micros: 0,
            partial_tp_bitmask: 0,
            breakeven_armed: false,
            trailing_armed: false,
            protection_update_count: 0,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = mqk_db::position_upsert(&self.db_pool, &position).await {
            tracing::error!(error = %e, position_id = %position.id, "position_upsert failed for new entry");
        }

        self.portfolio.record_open(position.id, position.side, intent.risk_amount_micros);

        let protect_result = self
            .executor
            .install_protection(
                &position.symbol,
                position.side,
                self.hedge_mode,
                position.active_sl_micros,
                position.active_tp_micros,
                mqk_exchange_gateway::ProtectionMode::Full,
                &self.rate_limiter,
                now,
            )
            .await;

        match protect_result {
            Ok(()) => {
                self.monitor
                    .register_position(position.clone(), self.protection_plan.clone(), self.hedge_mode)
                    .await;
            }
            Err(e) => {
                tracing::error!(error = %e, position_id = %position.id, "protection install failed on entry, position is unprotected");
                self.monitor
                    .register_unprotected(position.clone(), self.protection_plan.clone(), self.hedge_mode)
                    .await;
                self.record_event(LifecycleEvent::PositionUnprotected {
                    exchange: self.exchange.clone(),
                    position_id: position.id,
                    reason: e.to_string(),
                    ts: now,
                });
            }
        }

        self.record_event(LifecycleEvent::PositionOpened {
            exchange: self.exchange.clone(),
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: position.side,
            quantity_micros: position.current_qty_micros,
            ts: now,
        });

        IngestOutcome::Accepted { position_id: position.id }
    }

    /// Records a position close against the in-memory portfolio tracker.
    /// Called once `PositionMonitor` reports a position fully flat.
    pub fn record_position_closed(&self, position_id: Uuid, realised_pnl_micros: i64, now: DateTime<Utc>) {
        self.portfolio.record_close(position_id, realised_pnl_micros);
        self.record_event(LifecycleEvent::PositionClosed {
            exchange: self.exchange.clone(),
            position_id,
            realised_pnl_micros,
            ts: now,
        });
    }

    /// §6: publish this coordinator's current status into the shared
    /// `AppState` for the HTTP surface to serve. Intended to be run on a
    /// fixed cadence (e.g. alongside the lease heartbeat).
    pub async fn publish_status(&self, now: DateTime<Utc>) {
        let snapshot = self.portfolio.snapshot();
        let open_reservations = self.open_reservations.load(Ordering::Relaxed);
        let rate_buckets = {
            let rl = self.rate_limiter.lock().expect("rate limiter poisoned");
            rl.usage(now)
                .into_iter()
                .filter(|(ex, _, _)| ex == &self.exchange)
                .map(|(_, class, usage)| RateBucketStatus::from_usage(class, usage))
                .collect()
        };
        let recent_rejections = self.recent_rejections.lock().expect("recent rejections poisoned").clone().into();
        let lease_held = self.lease.lock().await.is_some();

        self.app_state
            .set_exchange_status(ExchangeStatus {
                exchange: self.exchange.0.clone(),
                armed: lease_held,
                lease_held,
                open_positions: snapshot.open_positions,
                open_reservations,
                rate_buckets,
                recent_rejections,
                last_heartbeat_age_seconds: Some(0),
                updated_at: now,
            })
            .await;
    }

    fn note_rejection(&self, symbol: &str, reason: &str, now: DateTime<Utc>) {
        let mut rejections = self.recent_rejections.lock().expect("recent rejections poisoned");
        rejections.push_back(RecentRejection {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
            ts: now,
        });
        if rejections.len() > RECENT_REJECTIONS_CAP {
            rejections.pop_front();
        }
    }

    fn record_event(&self, event: LifecycleEvent) {
        self.app_state.publish(event.clone());
        let payload = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize lifecycle event for audit log");
                return;
            }
        };
        let mut audit = self.audit.lock().expect("audit writer poisoned");
        if let Err(e) = audit.append(self.run_id, event.topic(), event.event_type(), payload) {
            tracing::error!(error = %e, "audit append failed");
        }
    }
}
