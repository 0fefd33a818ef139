use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BookingId, Cents, UserId, generate_reference, money, random_suffix};

pub type PaymentId = Uuid;

pub const PAYMENT_PREFIX: &str = "PAY";
pub const ORDER_PREFIX: &str = "ORD";
pub const REFUND_PREFIX: &str = "REF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Initiated,
    Processing,
    Success,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 8] = [
        PaymentStatus::Pending,
        PaymentStatus::Initiated,
        PaymentStatus::Processing,
        PaymentStatus::Success,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::Refunded,
        PaymentStatus::PartiallyRefunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Money has actually been collected for this payment.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Success | PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Upi,
    Card,
    NetBanking,
    Wallet,
    Emi,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Card => "card",
            PaymentMethod::NetBanking => "net_banking",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Emi => "emi",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "upi" => Some(PaymentMethod::Upi),
            "card" => Some(PaymentMethod::Card),
            "net_banking" => Some(PaymentMethod::NetBanking),
            "wallet" => Some(PaymentMethod::Wallet),
            "emi" => Some(PaymentMethod::Emi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Razorpay,
    Stripe,
    Paypal,
    Paytm,
    Cashfree,
    #[default]
    Manual,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::Razorpay => "razorpay",
            Gateway::Stripe => "stripe",
            Gateway::Paypal => "paypal",
            Gateway::Paytm => "paytm",
            Gateway::Cashfree => "cashfree",
            Gateway::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "razorpay" => Some(Gateway::Razorpay),
            "stripe" => Some(Gateway::Stripe),
            "paypal" => Some(Gateway::Paypal),
            "paytm" => Some(Gateway::Paytm),
            "cashfree" => Some(Gateway::Cashfree),
            "manual" => Some(Gateway::Manual),
            _ => None,
        }
    }
}

/// Input for recording a payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub user_id: UserId,
    #[serde(default)]
    pub booking_id: Option<BookingId>,
    #[serde(with = "money::decimal")]
    pub amount: Cents,
    #[serde(default)]
    pub currency: Option<String>,
    pub method: PaymentMethod,
    #[serde(default)]
    pub gateway: Gateway,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub booking_id: Option<BookingId>,
    pub user_id: UserId,
    pub payment_reference: String,
    pub order_reference: String,
    #[serde(with = "money::decimal")]
    pub amount: Cents,
    pub currency: String,
    pub method: PaymentMethod,
    pub gateway: Gateway,
    pub status: PaymentStatus,
    pub gateway_payment_id: Option<String>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    #[serde(with = "money::decimal")]
    pub refund_amount: Cents,
    pub refund_reason: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// A pending payment. `booking_number` is used for the order reference when linked.
    pub fn new(
        request: NewPayment,
        currency: String,
        booking_number: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let order_reference = match booking_number {
            Some(number) => format!("{}-{}", number, random_suffix()),
            None => generate_reference(ORDER_PREFIX, now),
        };
        Self {
            id: Uuid::new_v4(),
            booking_id: request.booking_id,
            user_id: request.user_id,
            payment_reference: generate_reference(PAYMENT_PREFIX, now),
            order_reference,
            amount: request.amount,
            currency,
            method: request.method,
            gateway: request.gateway,
            status: PaymentStatus::Pending,
            gateway_payment_id: None,
            initiated_at: None,
            completed_at: None,
            refunded_at: None,
            refund_amount: 0,
            refund_reason: None,
            description: request.description,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_refundable(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Success | PaymentStatus::PartiallyRefunded
        )
    }

    pub fn refundable_amount(&self) -> Cents {
        self.amount - self.refund_amount
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefund {
    pub id: Uuid,
    pub payment_id: PaymentId,
    pub reference: String,
    #[serde(with = "money::decimal")]
    pub amount: Cents,
    pub reason: String,
    pub processed_by: Option<UserId>,
    pub processed_at: DateTime<Utc>,
}

impl PaymentRefund {
    pub fn new(
        payment_id: PaymentId,
        amount: Cents,
        reason: String,
        processed_by: Option<UserId>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            reference: generate_reference(REFUND_PREFIX, at),
            amount,
            reason,
            processed_by,
            processed_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(booking_id: Option<BookingId>) -> NewPayment {
        NewPayment {
            user_id: Uuid::new_v4(),
            booking_id,
            amount: 20000,
            currency: None,
            method: PaymentMethod::Upi,
            gateway: Gateway::Razorpay,
            description: None,
        }
    }

    #[test]
    fn test_references_for_unlinked_payment() {
        let payment = Payment::new(request(None), "INR".into(), None, Utc::now());
        assert!(payment.payment_reference.starts_with("PAY"));
        assert!(payment.order_reference.starts_with("ORD"));
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[test]
    fn test_order_reference_uses_booking_number() {
        let payment = Payment::new(
            request(Some(Uuid::new_v4())),
            "INR".into(),
            Some("BK2410160001"),
            Utc::now(),
        );
        assert!(payment.order_reference.starts_with("BK2410160001-"));
        assert_eq!(payment.order_reference.len(), "BK2410160001-".len() + 8);
    }

    #[test]
    fn test_refundable_amount_tracks_refunds() {
        let mut payment = Payment::new(request(None), "INR".into(), None, Utc::now());
        assert!(!payment.is_refundable());

        payment.status = PaymentStatus::Success;
        payment.refund_amount = 5000;
        assert!(payment.is_refundable());
        assert_eq!(payment.refundable_amount(), 15000);
        assert!(payment.status.is_settled());
    }

    #[test]
    fn test_status_parsing() {
        for status in PaymentStatus::ALL {
            assert_eq!(PaymentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PaymentMethod::from_str("net_banking"), Some(PaymentMethod::NetBanking));
        assert_eq!(Gateway::from_str("bitpay"), None);
    }
}
