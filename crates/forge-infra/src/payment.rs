//! Payment webhook verification (Stripe-style signatures).
//!
//! The signature header has the form `t=<unix secs>,v1=<hex>[,v1=<hex>...]`.
//! The signed payload is `"{t}.{raw body}"`, HMAC-SHA256 with the endpoint
//! secret. Any matching `v1` entry is accepted so secrets can be rolled.

use forge_types::error::PaymentError;
use forge_types::payment::PaymentEvent;

use crate::crypto::signature::{hmac_sha256_hex, verify_hmac_sha256};

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Parsed signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, PaymentError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for item in header.split(',') {
            let Some((key, value)) = item.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    let parsed = value.parse::<i64>().map_err(|_| {
                        PaymentError::MalformedSignature(format!("invalid timestamp '{value}'"))
                    })?;
                    timestamp = Some(parsed);
                }
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| PaymentError::MalformedSignature("missing timestamp".to_string()))?;
        if signatures.is_empty() {
            return Err(PaymentError::MalformedSignature(
                "no v1 signature".to_string(),
            ));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Verify `payload` against a signature header.
///
/// `now` is the current unix time in seconds. A `tolerance_secs` of zero
/// disables the timestamp check.
pub fn verify_signature(
    secret: &[u8],
    payload: &[u8],
    header: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), PaymentError> {
    let parsed = SignatureHeader::parse(header)?;

    if tolerance_secs > 0 && (now - parsed.timestamp).abs() > tolerance_secs {
        return Err(PaymentError::Expired);
    }

    let signed = signed_payload(parsed.timestamp, payload);
    if parsed
        .signatures
        .iter()
        .any(|candidate| verify_hmac_sha256(secret, &signed, candidate))
    {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature)
    }
}

/// Build a valid signature header for `payload` at `timestamp`.
pub fn sign_payload(secret: &[u8], payload: &[u8], timestamp: i64) -> String {
    let signature = hmac_sha256_hex(secret, &signed_payload(timestamp, payload));
    format!("t={timestamp},v1={signature}")
}

/// Parse a verified webhook body.
pub fn parse_event(payload: &[u8]) -> Result<PaymentEvent, PaymentError> {
    serde_json::from_slice(payload).map_err(|e| PaymentError::InvalidPayload(e.to_string()))
}

fn signed_payload(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut signed = format!("{timestamp}.").into_bytes();
    signed.extend_from_slice(payload);
    signed
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"whsec_test_secret";
    const NOW: i64 = 1_760_000_000;
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"client_reference_id":"gm-1","payment_status":"paid"}}}"#;

    #[test]
    fn test_signed_payload_verifies() {
        let header = sign_payload(SECRET, BODY, NOW);
        assert!(verify_signature(SECRET, BODY, &header, NOW + 10, 300).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign_payload(SECRET, BODY, NOW);
        let tampered = BODY.to_vec().into_iter().rev().collect::<Vec<u8>>();
        assert!(matches!(
            verify_signature(SECRET, &tampered, &header, NOW, 300),
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = sign_payload(b"whsec_other", BODY, NOW);
        assert!(matches!(
            verify_signature(SECRET, BODY, &header, NOW, 300),
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let header = sign_payload(SECRET, BODY, NOW);
        assert!(matches!(
            verify_signature(SECRET, BODY, &header, NOW + 301, 300),
            Err(PaymentError::Expired)
        ));
        assert!(verify_signature(SECRET, BODY, &header, NOW + 301, 0).is_ok());
    }

    #[test]
    fn test_any_v1_entry_may_match() {
        let valid = sign_payload(SECRET, BODY, NOW);
        let signature = valid.split_once(",v1=").unwrap().1;
        let header = format!("t={NOW},v1=deadbeef,v0=ignored,v1={signature}");
        assert!(verify_signature(SECRET, BODY, &header, NOW, 300).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            SignatureHeader::parse("v1=abcd"),
            Err(PaymentError::MalformedSignature(_))
        ));
        assert!(matches!(
            SignatureHeader::parse("t=123"),
            Err(PaymentError::MalformedSignature(_))
        ));
        assert!(matches!(
            SignatureHeader::parse("t=soon,v1=abcd"),
            Err(PaymentError::MalformedSignature(_))
        ));
    }

    #[test]
    fn test_parse_event() {
        let event = parse_event(BODY).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.paid_checkout_reference(), Some("gm-1"));
        assert!(matches!(
            parse_event(b"not json"),
            Err(PaymentError::InvalidPayload(_))
        ));
    }
}
