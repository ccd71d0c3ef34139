//! §4.E WorkerCoordinator — single-writer role leasing.
//!
//! The strictly-consistent CAS primitive lives in `mqk-db`
//! (`lease_try_register`/`lease_heartbeat`/`lease_release`/
//! `lease_sweep_expired`, grounded on the outbox-claim
//! `UPDATE ... WHERE stale RETURNING` idiom). This crate is the typed façade
//! single-writer components actually call: `register` at startup, a spawned
//! heartbeat loop while held, and a spawned sweeper that expires stale
//! leases. This is the only mechanism preventing duplicate order submissions
//! from accidentally parallel processes (§4.E rationale).

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{error, info, warn};

/// A held lease handle. Dropping it does *not* release the lease — callers
/// must call [`WorkerCoordinator::release`] explicitly during an orderly
/// shutdown sequence.
#[derive(Clone, Debug)]
pub struct LeaseHandle {
    pub role: String,
    pub holder_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyHeld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Ok,
    /// The lease was lost (taken over, or this process's row was swept) —
    /// the caller must stop acting as the role holder immediately.
    Expired,
}

pub struct WorkerCoordinator {
    pool: PgPool,
    heartbeat_timeout_seconds: i64,
}

impl WorkerCoordinator {
    pub fn new(pool: PgPool, heartbeat_timeout_seconds: u32) -> Self {
        Self {
            pool,
            heartbeat_timeout_seconds: heartbeat_timeout_seconds as i64,
        }
    }

    /// Attempt to claim `role`. Succeeds only if no active lease exists (no
    /// row, or the existing row's heartbeat is already stale).
    pub async fn register(
        &self,
        role: &str,
        candidate_id: &str,
        metadata: serde_json::Value,
    ) -> Result<(RegisterOutcome, LeaseHandle)> {
        let won = mqk_db::lease_try_register(
            &self.pool,
            role,
            candidate_id,
            self.heartbeat_timeout_seconds,
            metadata,
        )
        .await
        .context("register: lease_try_register failed")?;

        let handle = LeaseHandle {
            role: role.to_string(),
            holder_id: candidate_id.to_string(),
        };
        if won {
            info!(role, candidate_id, "lease registered");
            Ok((RegisterOutcome::Registered, handle))
        } else {
            Ok((RegisterOutcome::AlreadyHeld, handle))
        }
    }

    /// Refresh `last_heartbeat` for a held lease.
    pub async fn heartbeat(&self, lease: &LeaseHandle) -> Result<HeartbeatOutcome> {
        let still_held = mqk_db::lease_heartbeat(&self.pool, &lease.role, &lease.holder_id)
            .await
            .context("heartbeat: lease_heartbeat failed")?;
        if still_held {
            Ok(HeartbeatOutcome::Ok)
        } else {
            warn!(role = %lease.role, holder = %lease.holder_id, "lease expired or taken over");
            Ok(HeartbeatOutcome::Expired)
        }
    }

    /// Clear the slot. No-op if this holder no longer holds it.
    pub async fn release(&self, lease: &LeaseHandle) -> Result<()> {
        mqk_db::lease_release(&self.pool, &lease.role, &lease.holder_id)
            .await
            .context("release: lease_release failed")?;
        info!(role = %lease.role, holder = %lease.holder_id, "lease released");
        Ok(())
    }

    /// Sweep and clear every lease whose heartbeat has gone stale. Intended
    /// to be run on a fixed cadence by [`spawn_sweeper`].
    pub async fn sweep_expired(&self) -> Result<Vec<(String, String)>> {
        mqk_db::lease_sweep_expired(&self.pool, self.heartbeat_timeout_seconds)
            .await
            .context("sweep_expired failed")
    }

    /// Spawn a background task publishing a heartbeat at `interval`.
    /// Publishes [`HeartbeatOutcome::Expired`] transitions via the returned
    /// watch channel rather than panicking the task, so a caller (e.g.
    /// TradingCoordinator) can react to losing the lease (stop accepting new
    /// signals, begin shutdown) instead of the process silently continuing
    /// to act as an un-leased writer.
    pub fn spawn_heartbeat(
        self: std::sync::Arc<Self>,
        lease: LeaseHandle,
        interval: Duration,
    ) -> (
        tokio::task::JoinHandle<()>,
        tokio::sync::watch::Receiver<HeartbeatOutcome>,
    ) {
        let (tx, rx) = tokio::sync::watch::channel(HeartbeatOutcome::Ok);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.heartbeat(&lease).await {
                    Ok(outcome) => {
                        let _ = tx.send(outcome);
                        if outcome == HeartbeatOutcome::Expired {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, role = %lease.role, "heartbeat call failed");
                    }
                }
            }
        });
        (handle, rx)
    }

    /// Spawn the sweeper task: on every `interval`, expire leases whose
    /// `last_heartbeat` is older than `heartbeat_timeout`.
    pub fn spawn_sweeper(self: std::sync::Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.sweep_expired().await {
                    Ok(expired) => {
                        for (role, holder) in expired {
                            warn!(role, holder, "lease swept: heartbeat timeout exceeded");
                        }
                    }
                    Err(e) => error!(error = %e, "lease sweep failed"),
                }
            }
        })
    }
}
