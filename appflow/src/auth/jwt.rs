//! Reading the `exp` claim out of a JWT without verifying it.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use crate::utils::Timestamp;

#[derive(Deserialize)]
struct Claims {
    exp: Option<serde_json::Value>,
}

/// Decodes the expiry claim of a JWT.
///
/// Returns `None` if the token has no payload segment, the payload is not
/// base64/JSON, or `exp` is missing or not a number of seconds.
#[must_use]
pub fn decode_expiry(token: &str) -> Option<Timestamp> {
    let payload = token.split('.').nth(1)?;
    let trimmed = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD.decode(payload))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;

    let seconds = match claims.exp? {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        _ => return None,
    };
    Utc.timestamp_opt(seconds, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::jwt_with_payload;

    #[test]
    fn test_decodes_exp() {
        let token = jwt_with_payload(&serde_json::json!({"sub": "x", "exp": 1_900_000_000}));
        let exp = decode_expiry(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_missing_exp() {
        let token = jwt_with_payload(&serde_json::json!({"sub": "x"}));
        assert!(decode_expiry(&token).is_none());
    }

    #[test]
    fn test_non_numeric_exp() {
        let token = jwt_with_payload(&serde_json::json!({"exp": "tomorrow"}));
        assert!(decode_expiry(&token).is_none());
    }

    #[test]
    fn test_not_a_jwt() {
        assert!(decode_expiry("opaque-token").is_none());
        assert!(decode_expiry("a.!!!.c").is_none());
        assert!(decode_expiry("").is_none());
    }

    #[test]
    fn test_padded_payload_accepted() {
        let payload = STANDARD.encode(br#"{"exp": 1700000000}"#);
        let token = format!("h.{payload}.s");
        assert_eq!(decode_expiry(&token).unwrap().timestamp(), 1_700_000_000);
    }
}
