//! HMAC-SHA256 request signing shared by every HTTP venue adapter.
//!
//! §4.A mandates signing over a canonicalised request: method, path, sorted
//! query/body, and timestamp. Implemented directly against `sha2::Sha256`
//! per RFC 2104 rather than pulling in a separate `hmac` crate — the
//! workspace's crypto surface stays at exactly the one crate the rest of the
//! core already depends on.

use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 64;

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut key_block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let digest = Sha256::digest(key);
        key_block[..digest.len()].copy_from_slice(&digest);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0x36u8; BLOCK_SIZE];
    let mut opad = [0x5cu8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        ipad[i] ^= key_block[i];
        opad[i] ^= key_block[i];
    }

    let mut inner = Sha256::new();
    inner.update(ipad);
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(opad);
    outer.update(inner_digest);
    outer.finalize().into()
}

/// Sign `method|path|sorted_query_and_body|timestamp` and return the lowercase
/// hex digest, as every supported venue expects in its signature header.
pub fn sign_request(
    api_secret: &str,
    method: &str,
    path: &str,
    canonical_query_and_body: &str,
    timestamp_millis: i64,
) -> String {
    let payload = format!("{method}|{path}|{canonical_query_and_body}|{timestamp_millis}");
    let mac = hmac_sha256(api_secret.as_bytes(), payload.as_bytes());
    hex::encode(mac)
}

/// Canonicalise a flat set of query/body parameters: sort by key, join as
/// `k=v` with `&`. Callers supply already-stringified values (the gateway
/// never performs float formatting at the signing boundary).
pub fn canonicalize_params(mut params: Vec<(String, String)>) -> String {
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic_for_identical_inputs() {
        let a = sign_request("secret", "POST", "/v5/order/create", "symbol=BTCUSDT", 1_700_000_000_000);
        let b = sign_request("secret", "POST", "/v5/order/create", "symbol=BTCUSDT", 1_700_000_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn signing_differs_by_secret() {
        let a = sign_request("secret-a", "POST", "/v5/order/create", "symbol=BTCUSDT", 1_700_000_000_000);
        let b = sign_request("secret-b", "POST", "/v5/order/create", "symbol=BTCUSDT", 1_700_000_000_000);
        assert_ne!(a, b);
    }

    #[test]
    fn canonicalize_params_sorts_by_key() {
        let params = vec![
            ("symbol".to_string(), "BTCUSDT".to_string()),
            ("apiKey".to_string(), "abc".to_string()),
        ];
        assert_eq!(canonicalize_params(params), "apiKey=abc&symbol=BTCUSDT");
    }

    #[test]
    fn hmac_matches_long_key_path() {
        // Exercises the key > block-size branch.
        let long_key = "x".repeat(100);
        let sig = sign_request(&long_key, "GET", "/v5/account/balance", "", 1_700_000_000_000);
        assert_eq!(sig.len(), 64);
    }
}
