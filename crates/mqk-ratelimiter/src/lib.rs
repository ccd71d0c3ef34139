//! §4.B RateLimiter — admission control per (exchange, endpoint-class) with
//! weighted sliding windows, plus a per-exchange global bucket bounding
//! cross-endpoint traffic.
//!
//! `acquire` never blocks: it evicts expired entries, checks whether the
//! requested weight fits under both the class bucket and the exchange-global
//! bucket, and either admits (returning `0.0`) or returns the delay in
//! seconds the caller must sleep before retrying. This mirrors
//! [`mqk_reconcile::watermark`]'s window/monotonicity style, generalized from
//! a single freshness watermark to a weighted admission window.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use mqk_schemas::{EndpointClass, ExchangeId};

/// A single weighted sliding window over one (exchange, scope) pair.
#[derive(Clone, Debug)]
struct SlidingWindow {
    window: ChronoDuration,
    /// Nominal configured limit before the safety margin is applied.
    nominal_limit: u32,
    /// `nominal_limit * safety_margin`, rounded down — the limit actually
    /// enforced, to tolerate clock skew between us and the venue.
    effective_limit: u32,
    entries: VecDeque<(DateTime<Utc>, u32)>,
}

impl SlidingWindow {
    fn new(window_seconds: u32, limit_weight: u32, safety_margin: f64) -> Self {
        let effective_limit = ((limit_weight as f64) * safety_margin).floor() as u32;
        Self {
            window: ChronoDuration::seconds(window_seconds as i64),
            nominal_limit: limit_weight,
            effective_limit: effective_limit.max(0),
            entries: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        while let Some((ts, _)) = self.entries.front() {
            if now.signed_duration_since(*ts) >= self.window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn current_weight(&self) -> u32 {
        self.entries.iter().map(|(_, w)| *w).sum()
    }

    /// `0.0` if `weight` fits under the limit right now; otherwise the delay
    /// in seconds until enough of the oldest entries expire to admit it.
    /// Pure — does not mutate `entries`. Caller must have already `evict`ed.
    fn delay_for(&self, weight: u32, now: DateTime<Utc>) -> f64 {
        let current = self.current_weight();
        if current + weight <= self.effective_limit {
            return 0.0;
        }
        let mut freed = 0i64;
        let needed = (current + weight) as i64 - self.effective_limit as i64;
        for (ts, w) in &self.entries {
            freed += *w as i64;
            if freed >= needed {
                let expires_at = *ts + self.window;
                let delay = expires_at.signed_duration_since(now);
                return (delay.num_milliseconds().max(0) as f64) / 1000.0;
            }
        }
        // Every current entry would need to expire and it still wouldn't be
        // enough (weight larger than the window could ever admit): wait out
        // the full window as the best available answer.
        (self.window.num_milliseconds() as f64) / 1000.0
    }

    fn commit(&mut self, now: DateTime<Utc>, weight: u32) {
        self.entries.push_back((now, weight));
    }
}

/// Read-only usage snapshot for the operational status surface.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketUsage {
    pub window_seconds: u32,
    pub limit_weight: u32,
    pub current_weight: u32,
}

#[derive(Clone, Debug)]
struct ExchangeBuckets {
    global: SlidingWindow,
    classes: HashMap<EndpointClass, SlidingWindow>,
}

/// Per-(exchange, endpoint-class) and per-exchange-global weighted sliding
/// window admission controller. Not internally locked — callers that share
/// one `RateLimiter` across concurrent tasks wrap it in a mutex (see
/// `mqk-execution`'s `BrokerGateway` chokepoint), matching this crate's
/// deterministic, no-IO design.
#[derive(Clone, Debug, Default)]
pub struct RateLimiter {
    exchanges: HashMap<ExchangeId, ExchangeBuckets>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the bucket configuration for one exchange, from
    /// the per-class limits plus the exchange-global limit.
    pub fn configure_exchange(
        &mut self,
        exchange: ExchangeId,
        global_window_seconds: u32,
        global_limit_weight: u32,
        safety_margin: f64,
        class_limits: impl IntoIterator<Item = (EndpointClass, u32, u32)>,
    ) {
        let mut classes = HashMap::new();
        for (class, window_seconds, limit_weight) in class_limits {
            classes.insert(
                class,
                SlidingWindow::new(window_seconds, limit_weight, safety_margin),
            );
        }
        self.exchanges.insert(
            exchange,
            ExchangeBuckets {
                global: SlidingWindow::new(global_window_seconds, global_limit_weight, safety_margin),
                classes,
            },
        );
    }

    /// §4.B `acquire`. Both the per-class bucket and the exchange-global
    /// bucket must admit for the call to be admitted; if either would
    /// block, neither bucket is mutated and the caller must sleep the
    /// returned delay (in seconds) before retrying. Returns `0.0` for an
    /// unconfigured exchange/class (fail-open — a missing config entry is a
    /// startup wiring bug, not a runtime throttle).
    pub fn acquire(
        &mut self,
        exchange: &ExchangeId,
        class: EndpointClass,
        weight: u32,
        now: DateTime<Utc>,
    ) -> f64 {
        let Some(buckets) = self.exchanges.get_mut(exchange) else {
            return 0.0;
        };

        buckets.global.evict(now);
        let class_bucket = buckets.classes.get_mut(&class);
        if let Some(cb) = class_bucket.as_deref_mut() {
            cb.evict(now);
        }

        let global_delay = buckets.global.delay_for(weight, now);
        let class_delay = class_bucket
            .as_deref()
            .map(|cb| cb.delay_for(weight, now))
            .unwrap_or(0.0);

        if global_delay > 0.0 || class_delay > 0.0 {
            return global_delay.max(class_delay);
        }

        buckets.global.commit(now, weight);
        if let Some(cb) = buckets.classes.get_mut(&class) {
            cb.commit(now, weight);
        }
        0.0
    }

    /// Convenience wrapper using wall-clock time.
    pub fn acquire_now(&mut self, exchange: &ExchangeId, class: EndpointClass, weight: u32) -> f64 {
        self.acquire(exchange, class, weight, Utc::now())
    }

    /// Snapshot of every configured bucket for the operational status
    /// endpoint ("rate-bucket usage").
    pub fn usage(&self, now: DateTime<Utc>) -> Vec<(ExchangeId, Option<EndpointClass>, BucketUsage)> {
        let mut out = Vec::new();
        for (ex, buckets) in &self.exchanges {
            let mut global = buckets.global.clone();
            global.evict(now);
            out.push((
                ex.clone(),
                None,
                BucketUsage {
                    window_seconds: global.window.num_seconds() as u32,
                    limit_weight: global.nominal_limit,
                    current_weight: global.current_weight(),
                },
            ));
            for (class, bucket) in &buckets.classes {
                let mut b = bucket.clone();
                b.evict(now);
                out.push((
                    ex.clone(),
                    Some(*class),
                    BucketUsage {
                        window_seconds: b.window.num_seconds() as u32,
                        limit_weight: b.nominal_limit,
                        current_weight: b.current_weight(),
                    },
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limiter_with(limit: u32, window_secs: u32, safety_margin: f64) -> (RateLimiter, ExchangeId) {
        let mut rl = RateLimiter::new();
        let ex = ExchangeId::from("bybit");
        rl.configure_exchange(
            ex.clone(),
            window_secs,
            limit,
            safety_margin,
            [(EndpointClass::Order, window_secs, limit)],
        );
        (rl, ex)
    }

    #[test]
    fn admits_weight_0_probe_at_limit() {
        let (mut rl, ex) = limiter_with(10, 60, 1.0);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        // Fill to exactly the limit.
        assert_eq!(rl.acquire(&ex, EndpointClass::Order, 10, t0), 0.0);
        // A weight-0 probe still admits at the limit.
        assert_eq!(rl.acquire(&ex, EndpointClass::Order, 0, t0), 0.0);
        // A weight-1 order is blocked.
        assert!(rl.acquire(&ex, EndpointClass::Order, 1, t0) > 0.0);
    }

    #[test]
    fn safety_margin_shrinks_effective_limit() {
        let (mut rl, ex) = limiter_with(100, 60, 0.9);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(rl.acquire(&ex, EndpointClass::Order, 90, t0), 0.0);
        assert!(rl.acquire(&ex, EndpointClass::Order, 1, t0) > 0.0);
    }

    #[test]
    fn admits_again_after_window_elapses() {
        let (mut rl, ex) = limiter_with(1, 60, 1.0);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(rl.acquire(&ex, EndpointClass::Order, 1, t0), 0.0);
        assert!(rl.acquire(&ex, EndpointClass::Order, 1, t0) > 0.0);
        let t1 = t0 + ChronoDuration::seconds(61);
        assert_eq!(rl.acquire(&ex, EndpointClass::Order, 1, t1), 0.0);
    }

    #[test]
    fn global_bucket_blocks_even_when_class_bucket_has_room() {
        let mut rl = RateLimiter::new();
        let ex = ExchangeId::from("bybit");
        rl.configure_exchange(
            ex.clone(),
            60,
            1, // tiny global budget
            1.0,
            [(EndpointClass::Order, 60, 100)],
        );
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(rl.acquire(&ex, EndpointClass::Order, 1, t0), 0.0);
        // Class bucket has plenty of room, but the global bucket is full.
        assert!(rl.acquire(&ex, EndpointClass::Order, 1, t0) > 0.0);
    }

    #[test]
    fn unconfigured_exchange_fails_open() {
        let mut rl = RateLimiter::new();
        let ex = ExchangeId::from("unknown");
        assert_eq!(rl.acquire(&ex, EndpointClass::Order, 1000, Utc::now()), 0.0);
    }

    #[test]
    fn blocked_call_does_not_partially_commit_either_bucket() {
        let mut rl = RateLimiter::new();
        let ex = ExchangeId::from("bybit");
        rl.configure_exchange(ex.clone(), 60, 5, 1.0, [(EndpointClass::Order, 60, 1)]);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        // Class bucket limit is 1; this call is blocked by the class bucket.
        assert!(rl.acquire(&ex, EndpointClass::Order, 2, t0) > 0.0);
        // Global bucket must not have been charged by the blocked call.
        let usage = rl.usage(t0);
        let global = usage.iter().find(|(_, c, _)| c.is_none()).unwrap();
        assert_eq!(global.2.current_weight, 0);
    }
}
