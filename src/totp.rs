//! RFC 6238 time-based one-time password engine.

use std::time::{SystemTime, UNIX_EPOCH};

use base32::{Alphabet, decode, encode};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha1::Sha1;
use subtle::{Choice, ConstantTimeEq};

/// Shared secret length in bytes. 160 bits, the RFC 4226 recommendation.
const SECRET_LENGTH: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum TotpError {
    #[error("secret is not valid base32")]
    InvalidSecret,
    #[error("system entropy unavailable: {0}")]
    Entropy(#[source] rand::Error),
    #[error("system clock is before the unix epoch")]
    Clock,
    #[error("HMAC key error")]
    Hmac,
}

/// Generates a new shared secret from the OS CSPRNG, base32-encoded without
/// padding.
///
/// An entropy failure is returned as [`TotpError::Entropy`]; there is no
/// fallback to a weaker generator.
pub fn generate_secret() -> Result<String, TotpError> {
    let mut bytes = [0u8; SECRET_LENGTH];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(TotpError::Entropy)?;

    Ok(encode(Alphabet::Rfc4648 { padding: false }, &bytes))
}

/// Builds the `otpauth://` provisioning URI consumed by authenticator apps.
///
/// SHA1, 6 digits and a 30-second period are the app defaults, so only the
/// issuer, label and secret are carried.
pub fn provisioning_uri(issuer: &str, account_label: &str, secret: &str) -> String {
    format!("otpauth://totp/{issuer}:{account_label}?secret={secret}&issuer={issuer}")
}

/// Generates the TOTP code for the time step containing `timestamp`.
pub fn generate(
    secret: &str,
    timestamp: u64,
    digits: u32,
    period: u64,
) -> Result<String, TotpError> {
    let key = decode(Alphabet::Rfc4648 { padding: false }, secret)
        .ok_or(TotpError::InvalidSecret)?;

    hotp(&key, timestamp / period, digits)
}

/// Validates a submitted code against the current time step and `window`
/// adjacent steps on either side.
///
/// Every failure path is a plain `false`; callers never observe a panic or
/// an error across this boundary.
pub fn validate(secret: &str, submitted: &str, window: u64, digits: u32, period: u64) -> bool {
    let Ok(elapsed) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return false;
    };

    validate_at(secret, submitted, window, digits, period, elapsed.as_secs())
}

/// Clock-injected form of [`validate`].
///
/// All candidate codes are computed and compared in constant time, and the
/// per-step results are combined without an early exit.
pub fn validate_at(
    secret: &str,
    submitted: &str,
    window: u64,
    digits: u32,
    period: u64,
    timestamp: u64,
) -> bool {
    let Some(key) = decode(Alphabet::Rfc4648 { padding: false }, secret) else {
        return false;
    };

    let current = timestamp / period;
    let mut matched = Choice::from(0u8);
    for step in current.saturating_sub(window)..=current.saturating_add(window) {
        let Ok(candidate) = hotp(&key, step, digits) else {
            return false;
        };
        matched |= candidate.as_bytes().ct_eq(submitted.as_bytes());
    }

    matched.into()
}

/// RFC 4226 HMAC-SHA1 code with dynamic truncation.
fn hotp(key: &[u8], counter: u64, digits: u32) -> Result<String, TotpError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(|_| TotpError::Hmac)?;
    mac.update(&counter.to_be_bytes());
    let result = mac.finalize().into_bytes();

    let offset = (result[19] & 0x0f) as usize;
    let binary_code = ((result[offset] as u32 & 0x7f) << 24)
        | ((result[offset + 1] as u32) << 16)
        | ((result[offset + 2] as u32) << 8)
        | (result[offset + 3] as u32);

    let mut code = (binary_code % 10u32.pow(digits)).to_string();

    // Ensure the code has the correct number of digits.
    while code.len() < digits as usize {
        code.insert(0, '0');
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B secret: ASCII "12345678901234567890".
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn generates_rfc_vectors() {
        // The 6-digit codes are the low-order digits of the appendix B
        // 8-digit vectors.
        assert_eq!(generate(RFC_SECRET, 59, 6, 30).unwrap(), "287082");
        assert_eq!(generate(RFC_SECRET, 1111111109, 6, 30).unwrap(), "081804");
        assert_eq!(generate(RFC_SECRET, 1234567890, 6, 30).unwrap(), "005924");
    }

    #[test]
    fn accepts_current_step() {
        assert!(validate_at(RFC_SECRET, "287082", 1, 6, 30, 59));
    }

    #[test]
    fn accepts_adjacent_steps() {
        // Codes for the steps just before and after t=59 (step 1).
        let previous = generate(RFC_SECRET, 29, 6, 30).unwrap();
        let next = generate(RFC_SECRET, 61, 6, 30).unwrap();

        assert!(validate_at(RFC_SECRET, &previous, 1, 6, 30, 59));
        assert!(validate_at(RFC_SECRET, &next, 1, 6, 30, 59));
    }

    #[test]
    fn rejects_outside_window() {
        let stale = generate(RFC_SECRET, 150, 6, 30).unwrap();
        assert!(!validate_at(RFC_SECRET, &stale, 1, 6, 30, 59));
    }

    #[test]
    fn rejects_foreign_secret() {
        let other = generate_secret().unwrap();
        let code = generate(&other, 59, 6, 30).unwrap();
        assert!(!validate_at(RFC_SECRET, &code, 1, 6, 30, 59));
    }

    #[test]
    fn rejects_zeroes() {
        assert!(!validate_at(RFC_SECRET, "000000", 1, 6, 30, 59));
    }

    #[test]
    fn rejects_invalid_base32_secret() {
        assert!(!validate_at("not base32!", "287082", 1, 6, 30, 59));
        assert!(generate("not base32!", 59, 6, 30).is_err());
    }

    #[test]
    fn secret_is_160_bits() {
        let secret = generate_secret().unwrap();
        let bytes = decode(Alphabet::Rfc4648 { padding: false }, &secret).unwrap();
        assert_eq!(bytes.len(), 20);
    }

    #[test]
    fn provisioning_uri_format() {
        assert_eq!(
            provisioning_uri("Example", "admin@co.test", "SECRET"),
            "otpauth://totp/Example:admin@co.test?secret=SECRET&issuer=Example"
        );
    }
}
