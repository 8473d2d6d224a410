use anyhow::{anyhow, bail};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

pub const CATEGORIES: [&str; 4] = ["TUITION", "EXAM", "HOSTEL", "DONATION"];
pub const STATUSES: [&str; 4] = ["PENDING", "SUCCESS", "FAILED", "REFUNDED"];
pub const DEFAULT_CURRENCY: &str = "INR";
pub const GATEWAY_SETTINGS_KEY: &str = "payments.gateway";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: String,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Parses a major-unit amount ("1500", "1500.5", 1500.25) into minor units.
/// At most two fractional digits are accepted, for strings and numbers alike.
pub fn parse_amount_minor(raw: &serde_json::Value) -> anyhow::Result<i64> {
    let text = match raw {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => bail!("amount must be a string or number"),
    };

    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text.as_str(), ""),
    };
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        bail!("invalid amount: {}", text);
    }
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        bail!("amount allows at most two decimal places: {}", text);
    }
    let whole: i64 = whole.parse().map_err(|_| anyhow!("amount too large: {}", text))?;
    let frac_minor: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>()? * 10,
        _ => frac.parse::<i64>()?,
    };
    let minor = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_minor))
        .ok_or_else(|| anyhow!("amount too large: {}", text))?;
    if minor <= 0 {
        bail!("amount must be greater than zero");
    }
    Ok(minor)
}

pub fn format_minor(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Order request body for the payment gateway.
pub fn order_request(payment_id: &str, amount_minor: i64, currency: &str) -> serde_json::Value {
    json!({
        "amount": amount_minor,
        "currency": currency,
        "receipt": format!("pay_{}", payment_id),
        "payment_capture": 1,
    })
}

fn signing_mac(order_id: &str, gateway_payment_id: &str, key_secret: &str) -> anyhow::Result<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key_secret.as_bytes())
        .map_err(|e| anyhow!("invalid gateway secret: {}", e))?;
    mac.update(format!("{}|{}", order_id, gateway_payment_id).as_bytes());
    Ok(mac)
}

pub fn expected_signature(order_id: &str, gateway_payment_id: &str, key_secret: &str) -> anyhow::Result<String> {
    let mac = signing_mac(order_id, gateway_payment_id, key_secret)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `signature` is the gateway's hex digest; anything that is not hex fails.
pub fn verify_signature(
    order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
    key_secret: &str,
) -> anyhow::Result<bool> {
    let Ok(given) = hex::decode(signature.trim()) else {
        return Ok(false);
    };
    let mac = signing_mac(order_id, gateway_payment_id, key_secret)?;
    Ok(mac.verify_slice(&given).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_units_into_paise() {
        assert_eq!(parse_amount_minor(&json!("1500")).expect("int"), 150000);
        assert_eq!(parse_amount_minor(&json!("1500.5")).expect("1dp"), 150050);
        assert_eq!(parse_amount_minor(&json!("0.05")).expect("2dp"), 5);
        assert_eq!(parse_amount_minor(&json!(250)).expect("number"), 25000);
        assert_eq!(parse_amount_minor(&json!(99.99)).expect("float"), 9999);
    }

    #[test]
    fn rejects_bad_amounts() {
        assert!(parse_amount_minor(&json!("abc")).is_err());
        assert!(parse_amount_minor(&json!("-5")).is_err());
        assert!(parse_amount_minor(&json!("1.234")).is_err());
        assert!(parse_amount_minor(&json!("0")).is_err());
        assert!(parse_amount_minor(&json!(null)).is_err());
    }

    #[test]
    fn numeric_amounts_follow_the_same_decimal_rule_as_strings() {
        assert!(parse_amount_minor(&json!(1500.005)).is_err());
        assert!(parse_amount_minor(&json!("1500.005")).is_err());
        assert_eq!(parse_amount_minor(&json!(1500.5)).expect("1dp"), 150050);
        assert!(parse_amount_minor(&json!(-5)).is_err());
    }

    #[test]
    fn formats_minor_units() {
        assert_eq!(format_minor(150050), "1500.50");
        assert_eq!(format_minor(5), "0.05");
    }

    #[test]
    fn order_request_uses_receipt_prefix() {
        let body = order_request("abc", 1000, "INR");
        assert_eq!(body["receipt"], "pay_abc");
        assert_eq!(body["amount"], 1000);
        assert_eq!(body["payment_capture"], 1);
    }

    #[test]
    fn signature_matches_hmac_of_order_and_payment() {
        let sig = expected_signature("order_1", "pay_1", "Jefe").expect("hmac");
        assert_eq!(sig.len(), 64);
        assert!(verify_signature("order_1", "pay_1", &sig, "Jefe").expect("verify"));
        assert!(verify_signature("order_1", "pay_1", &sig.to_uppercase(), "Jefe").expect("verify"));
        assert!(!verify_signature("order_1", "pay_2", &sig, "Jefe").expect("verify"));
        assert!(!verify_signature("order_1", "pay_1", "deadbeef", "Jefe").expect("verify"));
        assert!(!verify_signature("order_1", "pay_1", "not-hex", "Jefe").expect("verify"));
        assert!(!verify_signature("order_1", "pay_1", &sig[..62], "Jefe").expect("verify"));
    }
}
