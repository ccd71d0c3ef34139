//! Shared HTTP state, following the `mqk-daemon` shape: a
//! `Clone`-able `AppState` over a broadcast bus plus `RwLock`-guarded
//! snapshots, read by both the REST handlers and the SSE stream.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use crate::events::LifecycleEvent;
use crate::status::ExchangeStatus;

static START: OnceLock<Instant> = OnceLock::new();

pub fn uptime_secs() -> u64 {
    START.get_or_init(Instant::now).elapsed().as_secs()
}

#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: String,
    pub version: String,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            service: "mqk-coordinator".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Message carried on the SSE bus. One topic per variant, mirroring
/// `mqk-daemon`'s `BusMsg`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Lifecycle(LifecycleEvent),
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthSnapshot {
    pub daemon_uptime_secs: u64,
    pub exchanges: Vec<String>,
    pub build: BuildInfo,
    pub ts: DateTime<Utc>,
}

/// Process-wide shared state. One `TradingCoordinator` per configured
/// exchange publishes into `status`; the router reads it without knowing
/// how many exchanges are running or what adapter type backs any of them.
#[derive(Clone)]
pub struct AppState {
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub status: Arc<RwLock<BTreeMap<String, ExchangeStatus>>>,
}

impl Default for AppState {
    fn default() -> Self {
        let (bus, _) = broadcast::channel(1024);
        Self {
            bus,
            build: BuildInfo::default(),
            status: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.bus.send(BusMsg::Lifecycle(event));
    }

    pub async fn set_exchange_status(&self, status: ExchangeStatus) {
        self.status.write().await.insert(status.exchange.clone(), status);
    }
}

/// Background heartbeat, same cadence/shape as a production daemon: a
/// steady pulse on the bus so a connected SSE client can distinguish "alive
/// but idle" from "disconnected".
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let _ = bus.send(BusMsg::Heartbeat {
                ts_millis: Utc::now().timestamp_millis(),
            });
        }
    })
}
