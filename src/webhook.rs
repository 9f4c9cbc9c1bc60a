//! Payment provider notification format.
//!
//! Notifications are signed with HMAC-SHA256 over the raw request body using the
//! tenant's webhook secret and sent hex-encoded in [`SIGNATURE_HEADER`].

use bigdecimal::{BigDecimal, Signed};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::errors::RejectReason;

pub const SIGNATURE_HEADER: &str = "X-Signature";

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str) -> Result<HmacSha256, RejectReason> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| RejectReason::InvalidSignature)
}

pub fn sign(payload: &[u8], secret: &str) -> Result<String, RejectReason> {
    let mut mac = mac(secret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of `signature` against the body.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> Result<(), RejectReason> {
    let sig_bytes = hex::decode(signature.trim()).map_err(|_| RejectReason::InvalidSignature)?;
    let mut mac = mac(secret)?;
    mac.update(payload);
    mac.verify_slice(&sig_bytes).map_err(|_| RejectReason::InvalidSignature)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentNotification {
    pub transaction_id: String,
    /// The provider echoes back our order reference under `order_id`.
    #[serde(rename = "order_id")]
    pub order_reference: String,
    pub gross_amount: BigDecimal,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub status_code: Option<String>,
}

pub fn parse_notification(raw: &[u8]) -> Result<PaymentNotification, RejectReason> {
    let notification: PaymentNotification =
        serde_json::from_slice(raw).map_err(|e| RejectReason::MalformedPayload(e.to_string()))?;
    if notification.transaction_id.trim().is_empty() {
        return Err(RejectReason::MalformedPayload("transaction_id is empty".into()));
    }
    if notification.order_reference.trim().is_empty() {
        return Err(RejectReason::MalformedPayload("order_id is empty".into()));
    }
    if notification.gross_amount.is_negative() {
        return Err(RejectReason::MalformedPayload("gross_amount is negative".into()));
    }
    Ok(notification)
}

/// What a provider status asks of the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Failed,
    Pending,
    /// No transition, but an operator has to look at it.
    Review(&'static str),
    Unknown,
}

pub fn map_status(transaction_status: &str, fraud_status: Option<&str>) -> PaymentOutcome {
    match transaction_status {
        "settlement" => PaymentOutcome::Paid,
        "capture" => match fraud_status {
            None | Some("accept") => PaymentOutcome::Paid,
            Some("challenge") => PaymentOutcome::Review("payment captured but challenged by fraud screening"),
            Some(_) => PaymentOutcome::Failed,
        },
        "deny" | "cancel" | "expire" | "failure" => PaymentOutcome::Failed,
        "pending" | "authorize" => PaymentOutcome::Pending,
        "refund" | "partial_refund" | "chargeback" | "partial_chargeback" => {
            PaymentOutcome::Review("refund reported by provider, handle manually")
        }
        _ => PaymentOutcome::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"transaction_id":"tx-1","order_id":"ORD-20240301-ABC","gross_amount":"150000.00","transaction_status":"settlement"}"#;

    #[test]
    fn test_valid_signature() {
        let signature = sign(BODY, SECRET).unwrap();
        assert_eq!(verify_signature(BODY, &signature, SECRET), Ok(()));
    }

    #[test]
    fn test_wrong_secret() {
        let signature = sign(BODY, "other").unwrap();
        assert_eq!(
            verify_signature(BODY, &signature, SECRET),
            Err(RejectReason::InvalidSignature)
        );
    }

    #[test]
    fn test_tampered_body() {
        let signature = sign(BODY, SECRET).unwrap();
        let tampered = String::from_utf8_lossy(BODY).replace("150000.00", "1.00");
        assert_eq!(
            verify_signature(tampered.as_bytes(), &signature, SECRET),
            Err(RejectReason::InvalidSignature)
        );
    }

    #[test]
    fn test_garbage_signature() {
        assert_eq!(
            verify_signature(BODY, "not-hex", SECRET),
            Err(RejectReason::InvalidSignature)
        );
        assert_eq!(verify_signature(BODY, "", SECRET), Err(RejectReason::InvalidSignature));
    }

    #[test]
    fn test_parse_notification() {
        let n = parse_notification(BODY).unwrap();
        assert_eq!(n.transaction_id, "tx-1");
        assert_eq!(n.order_reference, "ORD-20240301-ABC");
        assert_eq!(n.gross_amount, BigDecimal::from_str("150000").unwrap());
        assert_eq!(n.transaction_status, "settlement");
        assert_eq!(n.fraud_status, None);
    }

    #[test]
    fn test_parse_numeric_amount() {
        let n = parse_notification(
            br#"{"transaction_id":"tx-2","order_id":"R","gross_amount":42,"transaction_status":"pending"}"#,
        )
        .unwrap();
        assert_eq!(n.gross_amount, BigDecimal::from(42));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            parse_notification(b"{"),
            Err(RejectReason::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_notification(
                br#"{"transaction_id":"","order_id":"R","gross_amount":"1","transaction_status":"settlement"}"#
            ),
            Err(RejectReason::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_notification(br#"{"order_id":"R","gross_amount":"1","transaction_status":"settlement"}"#),
            Err(RejectReason::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_map_status() {
        assert_eq!(map_status("settlement", None), PaymentOutcome::Paid);
        assert_eq!(map_status("capture", None), PaymentOutcome::Paid);
        assert_eq!(map_status("capture", Some("accept")), PaymentOutcome::Paid);
        assert!(matches!(map_status("capture", Some("challenge")), PaymentOutcome::Review(_)));
        assert_eq!(map_status("capture", Some("deny")), PaymentOutcome::Failed);
        assert_eq!(map_status("deny", None), PaymentOutcome::Failed);
        assert_eq!(map_status("cancel", None), PaymentOutcome::Failed);
        assert_eq!(map_status("expire", None), PaymentOutcome::Failed);
        assert_eq!(map_status("pending", None), PaymentOutcome::Pending);
        assert!(matches!(map_status("refund", None), PaymentOutcome::Review(_)));
        assert_eq!(map_status("something_new", None), PaymentOutcome::Unknown);
    }
}
