//! §4.D SignalDeduplicator — fingerprints signals and rejects duplicates
//! seen within a time window.
//!
//! Fingerprinting itself lives in `mqk_schemas::fingerprint` (it is a pure
//! content digest, not a deduplication policy); this crate owns only the
//! time-windowed admission decision, lazy purge, and observability counters.
//! Grounded on `mqk-reconcile`'s watermark window-eviction style.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use mqk_schemas::{fingerprint::fingerprint_signal, Signal, SignalFingerprint};

/// Outcome of one `admit` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmitDecision {
    Accepted,
    RejectedDuplicate,
}

/// Observability counters, exposed on the operational status surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DedupStats {
    pub total_checks: u64,
    pub duplicates_found: u64,
}

/// Time-windowed fingerprint admission. `window` is typically 300s per the
/// spec default. Purge is lazy: every `admit` call first drops fingerprints
/// older than `window`, so memory is bounded by the admit rate rather than
/// requiring a separate sweeper task.
pub struct SignalDeduplicator {
    window: chrono::Duration,
    /// First-seen timestamp per fingerprint still inside the window.
    seen: HashMap<SignalFingerprint, DateTime<Utc>>,
    stats: DedupStats,
}

impl SignalDeduplicator {
    pub fn new(window_seconds: u32) -> Self {
        Self {
            window: chrono::Duration::seconds(window_seconds as i64),
            seen: HashMap::new(),
            stats: DedupStats::default(),
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.seen
            .retain(|_, first_seen| now.signed_duration_since(*first_seen) < self.window);
    }

    /// Admit (or reject) a signal at the given instant. A signal whose
    /// fingerprint was already admitted within the window is rejected as a
    /// duplicate; otherwise it is accepted and its fingerprint recorded.
    pub fn admit(&mut self, signal: &Signal, now: DateTime<Utc>) -> AdmitDecision {
        self.purge_expired(now);
        self.stats.total_checks += 1;

        let fp = fingerprint_signal(signal);
        if self.seen.contains_key(&fp) {
            self.stats.duplicates_found += 1;
            return AdmitDecision::RejectedDuplicate;
        }
        self.seen.insert(fp, now);
        AdmitDecision::Accepted
    }

    /// Convenience wrapper using wall-clock time.
    pub fn admit_now(&mut self, signal: &Signal) -> AdmitDecision {
        self.admit(signal, Utc::now())
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }
}
