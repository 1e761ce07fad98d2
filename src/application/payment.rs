use crate::domain::event::{BookingCompleted, PaymentCompleted};
use crate::domain::ports::EventHandler;
use crate::error::Result;
use tracing::info;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Payment step for completed bookings.
///
/// This is a stub: every payment succeeds. Card details are carried through
/// untouched and never logged.
pub struct PaymentHandler {
    clock: fn() -> i64,
}

impl PaymentHandler {
    pub fn new() -> Self {
        Self { clock: now_millis }
    }

    /// Uses `clock` for outbound timestamps instead of the system time.
    pub fn with_clock(clock: fn() -> i64) -> Self {
        Self { clock }
    }
}

impl Default for PaymentHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for PaymentHandler {
    type Input = BookingCompleted;
    type Output = PaymentCompleted;

    fn handle(&self, booking: BookingCompleted) -> Result<Option<PaymentCompleted>> {
        info!(amount = %booking.price, "Processing payment");
        Ok(Some(PaymentCompleted::complete(booking.price)))
    }

    fn stamp(&self, payment: PaymentCompleted) -> PaymentCompleted {
        payment.stamped((self.clock)())
    }
}
