//! Shared helpers: id generation, OTP hashing, retry/backoff, and the
//! crypto-gateway's unsupported-fiat-to-USD conversion table.

use crate::errors::{EngineError, Result};
use crate::types::Currency;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256, Sha512};
use std::str::FromStr;
use std::time::Duration;

/// Generates a random, globally-unique-enough id: a prefix plus 16 random
/// hex bytes, e.g. `txn_3f9a...`. Collisions are treated as `DuplicateKey`
/// by `ledger::append`, which is the actual uniqueness guard.
pub fn generate_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    format!("{prefix}_{}", hex::encode(bytes))
}

/// Generates a 6-digit numeric OTP, zero-padded.
pub fn generate_otp() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000u32))
}

/// Hashes an OTP for storage (`metadata.otpHash`). Never store the plaintext code.
pub fn hash_otp(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verifies a submitted OTP against its stored hash.
pub fn verify_otp(code: &str, stored_hash: &str) -> bool {
    hash_otp(code) == stored_hash
}

/// Verifies an HMAC-SHA512 webhook signature (NOWPayments' IPN scheme):
/// the signature is computed over the raw request body using a shared secret.
pub fn verify_hmac_sha512(raw_body: &[u8], secret: &str, signature_hex: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha512>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    match hex::decode(signature_hex) {
        Ok(sig_bytes) => mac.verify_slice(&sig_bytes).is_ok(),
        Err(_) => false,
    }
}

/// Hard-coded "unsupported fiat -> USD" conversion table for the crypto
/// gateway (spec.md §4.3, §9). Treated as config-shaped data rather than
/// literals scattered through the adapter; callers should log a warning
/// whenever this table is consulted, since the rates will drift.
pub fn crypto_fiat_to_usd_rate(currency: Currency) -> Option<Decimal> {
    match currency {
        Currency::Xaf => Some(Decimal::from_str("0.0016").unwrap()),
        Currency::Xof => Some(Decimal::from_str("0.0016").unwrap()),
        Currency::Gnf => Some(Decimal::from_str("0.00012").unwrap()),
        Currency::Cdf => Some(Decimal::from_str("0.0004").unwrap()),
        Currency::Kes => Some(Decimal::from_str("0.0067").unwrap()),
        _ => None,
    }
}

/// `true` for USD-pegged stablecoins, used to short-circuit USD estimates
/// to 1:1 without calling the provider (spec.md §4.3 edge case).
pub fn is_usd_pegged_stablecoin(currency: Currency) -> bool {
    matches!(currency, Currency::UsdtSol | Currency::UsdtBsc)
}

/// Classifies a transport failure as retryable or not, per spec.md §4.3's
/// {DNS, connection-refused, reset, timeout} retryable class. A well-formed
/// response the provider sent back (even an error status) is not a
/// transport failure and is never retried through this path.
pub fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Exponential backoff schedule matching spec.md §4.3: 3 attempts, base 1s, factor 2.
pub fn backoff_schedule() -> Vec<Duration> {
    vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
}

/// Runs `op` with the engine's standard retry policy, retrying only on
/// retryable errors and sleeping the backoff schedule between attempts.
pub async fn with_retry<F, Fut, T>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let schedule = backoff_schedule();
    let mut last_err = None;
    for (attempt, delay) in schedule.iter().enumerate() {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                last_err = Some(e);
                if attempt + 1 < schedule.len() {
                    tokio::time::sleep(*delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| EngineError::Internal("retry loop exhausted with no error".into())))
}

/// Current UTC timestamp, factored out so call sites don't reach for
/// `chrono::Utc::now()` directly everywhere.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// `true` if `expires_at` has not yet passed.
pub fn not_expired(expires_at: DateTime<Utc>) -> bool {
    now() <= expires_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_round_trip() {
        let code = generate_otp();
        assert_eq!(code.len(), 6);
        let hash = hash_otp(&code);
        assert!(verify_otp(&code, &hash));
    }

    #[test]
    fn generated_ids_are_prefixed_and_unique_enough() {
        let a = generate_id("txn");
        let b = generate_id("txn");
        assert!(a.starts_with("txn_"));
        assert_ne!(a, b);
    }

    #[test]
    fn hmac_sha512_verifies_matching_signature_only() {
        let secret = "ipn-secret";
        let body = b"{\"payment_id\":123}";
        let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_hmac_sha512(body, secret, &sig));
        assert!(!verify_hmac_sha512(body, "wrong-secret", &sig));
        assert!(!verify_hmac_sha512(b"tampered", secret, &sig));
    }

    #[test]
    fn crypto_fiat_rate_table_covers_reserved_currencies() {
        assert!(crypto_fiat_to_usd_rate(Currency::Xaf).is_some());
        assert!(crypto_fiat_to_usd_rate(Currency::Gnf).is_some());
        assert!(crypto_fiat_to_usd_rate(Currency::Usd).is_none());
    }

    #[test]
    fn stablecoins_short_circuit_to_1to1() {
        assert!(is_usd_pegged_stablecoin(Currency::UsdtBsc));
        assert!(is_usd_pegged_stablecoin(Currency::UsdtSol));
        assert!(!is_usd_pegged_stablecoin(Currency::Btc));
    }

    #[tokio::test]
    async fn with_retry_gives_up_after_backoff_schedule_is_exhausted() {
        let mut attempts = 0;
        let result: Result<()> = with_retry(|| {
            attempts += 1;
            async { Err(EngineError::ProviderUnavailable("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_non_retryable_errors() {
        let mut attempts = 0;
        let result: Result<()> = with_retry(|| {
            attempts += 1;
            async { Err(EngineError::Validation("bad amount".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
