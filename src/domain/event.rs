use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;

/// Wraps a value that must never reach the logs.
///
/// `Debug` and `Display` print a fixed mask. The inner value is only reachable
/// through [`Sensitive::expose`].
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sensitive(***)")
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Inbound event published when a booking is completed.
///
/// The card fields are opaque pass-through data and are not validated.
/// `price` is kept as the JSON number it arrived as, so any numeric value is
/// accepted and echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCompleted {
    pub price: Number,
    #[serde(default)]
    pub card_number: Option<Sensitive<String>>,
    #[serde(default)]
    pub expiry: Option<Sensitive<String>>,
    #[serde(default)]
    pub cvv: Option<Sensitive<String>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum PaymentStatus {
    #[serde(rename = "Payment complete")]
    Complete,
}

/// Outbound event announcing a processed payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub status: PaymentStatus,
    /// Echo of the booking price.
    pub amount: Number,
    /// Milliseconds since the Unix epoch, taken when the event is published.
    pub timestamp: i64,
}

impl PaymentCompleted {
    /// A completed payment, not yet stamped (`timestamp` is 0).
    pub fn complete(amount: Number) -> Self {
        Self {
            status: PaymentStatus::Complete,
            amount,
            timestamp: 0,
        }
    }

    pub fn stamped(self, timestamp: i64) -> Self {
        Self { timestamp, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_deserialization() {
        let raw = r#"{"price": 42.5, "cardNumber": "4111111111111111", "expiry": "12/30", "cvv": "123"}"#;
        let booking: BookingCompleted = serde_json::from_str(raw).unwrap();

        assert_eq!(booking.price.as_f64(), Some(42.5));
        assert_eq!(
            booking.card_number.as_ref().map(|c| c.expose().as_str()),
            Some("4111111111111111")
        );
        assert_eq!(booking.cvv.as_ref().map(|c| c.expose().as_str()), Some("123"));
    }

    #[test]
    fn test_booking_debug_masks_credentials() {
        let raw = r#"{"price": 10, "cardNumber": "4111111111111111", "expiry": "12/30", "cvv": "987"}"#;
        let booking: BookingCompleted = serde_json::from_str(raw).unwrap();
        let rendered = format!("{:?}", booking);

        assert!(!rendered.contains("4111111111111111"));
        assert!(!rendered.contains("12/30"));
        assert!(!rendered.contains("987"));
        assert!(rendered.contains("price"));
    }

    #[test]
    fn test_booking_requires_price() {
        assert!(serde_json::from_str::<BookingCompleted>(r#"{"cardNumber": "1"}"#).is_err());
        assert!(serde_json::from_str::<BookingCompleted>(r#"{"price": null}"#).is_err());
        assert!(serde_json::from_str::<BookingCompleted>(r#"{"price": "12"}"#).is_err());
        assert!(serde_json::from_str::<BookingCompleted>("not-json").is_err());
    }

    #[test]
    fn test_booking_credentials_are_optional() {
        let booking: BookingCompleted = serde_json::from_str(r#"{"price": 7}"#).unwrap();
        assert_eq!(booking.price.as_u64(), Some(7));
        assert!(booking.card_number.is_none());
    }

    #[test]
    fn test_booking_accepts_any_json_number() {
        for raw in [
            "7",
            "-3",
            "0.30000000000000004",
            "1e30",
            "-1e29",
            "1.7976931348623157e308",
            "123456789012345678901234567890",
        ] {
            let booking: BookingCompleted =
                serde_json::from_str(&format!(r#"{{"price": {raw}}}"#)).unwrap();
            let expected: Number = serde_json::from_str(raw).unwrap();
            assert_eq!(booking.price, expected, "price {raw}");
        }
    }

    #[test]
    fn test_payment_echoes_integer_amount_unchanged() {
        let amount: Number = serde_json::from_str("7").unwrap();
        let rendered = serde_json::to_string(&PaymentCompleted::complete(amount).stamped(5)).unwrap();
        assert_eq!(
            rendered,
            r#"{"status":"Payment complete","amount":7,"timestamp":5}"#
        );
    }

    #[test]
    fn test_payment_completed_wire_format() {
        let amount: Number = serde_json::from_str("42.5").unwrap();
        let event = PaymentCompleted::complete(amount).stamped(1_700_000_000_000);
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["status"], "Payment complete");
        assert_eq!(value["amount"].as_f64(), Some(42.5));
        assert_eq!(value["timestamp"].as_i64(), Some(1_700_000_000_000));
    }
}
