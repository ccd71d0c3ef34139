//! §6 operational surface: the plain-data status one `TradingCoordinator`
//! reports, aggregated across every configured exchange behind `AppState`.

use chrono::{DateTime, Utc};
use mqk_ratelimiter::BucketUsage;
use mqk_schemas::EndpointClass;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct RateBucketStatus {
    pub endpoint_class: Option<EndpointClass>,
    pub window_seconds: u32,
    pub limit_weight: u32,
    pub current_weight: u32,
}

impl RateBucketStatus {
    pub fn from_usage(class: Option<EndpointClass>, usage: BucketUsage) -> Self {
        Self {
            endpoint_class: class,
            window_seconds: usage.window_seconds,
            limit_weight: usage.limit_weight,
            current_weight: usage.current_weight,
        }
    }
}

/// One recent rejection, kept for operator visibility — bounded, not a
/// full audit trail (the audit log is the trail of record).
#[derive(Clone, Debug, Serialize)]
pub struct RecentRejection {
    pub symbol: String,
    pub reason: String,
    pub ts: DateTime<Utc>,
}

/// Everything the §6 status query reports for one exchange.
#[derive(Clone, Debug, Serialize)]
pub struct ExchangeStatus {
    pub exchange: String,
    pub armed: bool,
    pub lease_held: bool,
    pub open_positions: u32,
    pub open_reservations: u32,
    pub rate_buckets: Vec<RateBucketStatus>,
    pub recent_rejections: Vec<RecentRejection>,
    pub last_heartbeat_age_seconds: Option<i64>,
    pub updated_at: DateTime<Utc>,
}
