//! Signal fingerprinting.
//!
//! The fingerprint is a 64-bit digest over `(symbol, side, strategy_id,
//! timestamp floored to one-minute granularity)`. It deliberately excludes
//! price/SL/TP/confidence: two signals for the same symbol/side/strategy in
//! the same minute are the same trading intent even if a producer jittered
//! the suggested entry price between emissions.

use crate::{Side, Signal, SignalFingerprint};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Floor a timestamp to one-minute granularity (seconds and sub-second
/// components zeroed).
pub fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(60);
    DateTime::<Utc>::from_timestamp(floored, 0).expect("floored timestamp in range")
}

/// Compute the 64-bit content digest for a signal.
pub fn fingerprint_signal(signal: &Signal) -> SignalFingerprint {
    fingerprint_parts(
        &signal.symbol,
        signal.side,
        &signal.strategy_id,
        signal.producer_ts,
    )
}

/// Compute the digest from raw parts, for callers that need to check a
/// fingerprint before a full `Signal` is constructed (e.g. ingress filters).
pub fn fingerprint_parts(
    symbol: &str,
    side: Side,
    strategy_id: &str,
    ts: DateTime<Utc>,
) -> SignalFingerprint {
    let floored = floor_to_minute(ts);
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update([0u8]);
    hasher.update(side.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(strategy_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(floored.timestamp().to_be_bytes());

    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    SignalFingerprint(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn same_minute_same_fingerprint() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 5).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 59).unwrap();
        let a = fingerprint_parts("BTCUSDT", Side::Long, "ml", t0);
        let b = fingerprint_parts("BTCUSDT", Side::Long, "ml", t1);
        assert_eq!(a, b);
    }

    #[test]
    fn different_minute_different_fingerprint() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 5).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 1, 5).unwrap();
        let a = fingerprint_parts("BTCUSDT", Side::Long, "ml", t0);
        let b = fingerprint_parts("BTCUSDT", Side::Long, "ml", t1);
        assert_ne!(a, b);
    }

    #[test]
    fn different_side_different_fingerprint() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 5).unwrap();
        let a = fingerprint_parts("BTCUSDT", Side::Long, "ml", t0);
        let b = fingerprint_parts("BTCUSDT", Side::Short, "ml", t0);
        assert_ne!(a, b);
    }
}
