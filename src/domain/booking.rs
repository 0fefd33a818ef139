use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, ProviderId, ServiceId, UserId, money};

pub type BookingId = Uuid;

/// Prefix of every booking number.
pub const BOOKING_NUMBER_PREFIX: &str = "BK";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Accepted,
    Rejected,
    InProgress,
    Completed,
    Cancelled,
    Rescheduled,
    NoShow,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 9] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Accepted,
        BookingStatus::Rejected,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Rescheduled,
        BookingStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Rejected => "rejected",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rescheduled => "rescheduled",
            BookingStatus::NoShow => "no_show",
        }
    }

    /// Exact match on the stored value; status strings are not case-folded.
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed
                | BookingStatus::Cancelled
                | BookingStatus::Rejected
                | BookingStatus::NoShow
        )
    }

    /// Statuses that still count as an upcoming engagement.
    pub fn is_upcoming(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::Accepted
        )
    }

    /// Statuses reachable from this one along the normal lifecycle.
    pub fn successors(&self) -> &'static [BookingStatus] {
        use BookingStatus::*;
        match self {
            Pending => &[Confirmed, Accepted, Rejected, Cancelled, Rescheduled],
            Confirmed => &[Accepted, Rejected, Cancelled, Rescheduled, NoShow],
            Accepted => &[InProgress, Cancelled, Rescheduled, NoShow],
            InProgress => &[Completed, Cancelled],
            Rescheduled => &[Confirmed, Accepted, Rejected, Cancelled, Rescheduled, NoShow],
            Completed | Cancelled | Rejected | NoShow => &[],
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        self.successors().contains(&next)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How strictly status transitions are checked against the lifecycle graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Any status may follow any other.
    #[default]
    Permissive,
    /// Only edges listed by [`BookingStatus::successors`] are accepted.
    Strict,
}

impl TransitionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionPolicy::Permissive => "permissive",
            TransitionPolicy::Strict => "strict",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "permissive" => Some(TransitionPolicy::Permissive),
            "strict" => Some(TransitionPolicy::Strict),
            _ => None,
        }
    }

    pub fn check(&self, from: BookingStatus, to: BookingStatus) -> Result<(), TransitionError> {
        match self {
            TransitionPolicy::Permissive => Ok(()),
            TransitionPolicy::Strict if from.can_transition_to(to) => Ok(()),
            TransitionPolicy::Strict => Err(TransitionError::Illegal { from, to }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    MissingCancellationReason,
    Illegal {
        from: BookingStatus,
        to: BookingStatus,
    },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::MissingCancellationReason => {
                write!(f, "a cancellation reason is required")
            }
            TransitionError::Illegal { from, to } => {
                write!(f, "cannot move a booking from {} to {}", from, to)
            }
        }
    }
}

impl std::error::Error for TransitionError {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Emergency,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Emergency => "emergency",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "emergency" => Some(Priority::Emergency),
            _ => None,
        }
    }
}

/// Payment progress of a booking, independent of its lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingPaymentStatus {
    #[default]
    Pending,
    Partial,
    Paid,
    Refunded,
    Failed,
}

impl BookingPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingPaymentStatus::Pending => "pending",
            BookingPaymentStatus::Partial => "partial",
            BookingPaymentStatus::Paid => "paid",
            BookingPaymentStatus::Refunded => "refunded",
            BookingPaymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingPaymentStatus::Pending),
            "partial" => Some(BookingPaymentStatus::Partial),
            "paid" => Some(BookingPaymentStatus::Paid),
            "refunded" => Some(BookingPaymentStatus::Refunded),
            "failed" => Some(BookingPaymentStatus::Failed),
            _ => None,
        }
    }

    /// Payment status implied by how much has been paid against the total.
    pub fn derive(advance_paid: Cents, total_amount: Cents) -> Self {
        if advance_paid <= 0 {
            BookingPaymentStatus::Pending
        } else if advance_paid >= total_amount {
            BookingPaymentStatus::Paid
        } else {
            BookingPaymentStatus::Partial
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u32,
}

impl Schedule {
    pub fn new(date: NaiveDate, time: NaiveTime, duration_minutes: u32) -> Self {
        Self {
            date,
            time,
            duration_minutes,
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Input for creating a booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    pub customer_id: UserId,
    pub provider_id: ProviderId,
    pub service_id: ServiceId,
    pub schedule: Schedule,
    pub location: Location,
    pub problem_description: String,
    #[serde(with = "money::decimal")]
    pub quoted_price: Cents,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub customer_notes: Option<String>,
}

/// A scheduled engagement between a customer and a provider.
/// Financial totals are derived on read and never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    /// Human readable, date coded, immutable once assigned
    pub booking_number: String,
    pub customer_id: UserId,
    pub provider_id: ProviderId,
    pub service_id: ServiceId,
    pub schedule: Schedule,
    pub location: Location,
    pub problem_description: String,
    pub customer_notes: Option<String>,
    pub provider_notes: Option<String>,
    pub status: BookingStatus,
    pub priority: Priority,
    #[serde(with = "money::decimal")]
    pub quoted_price: Cents,
    #[serde(with = "money::decimal_opt")]
    pub final_price: Option<Cents>,
    #[serde(with = "money::decimal")]
    pub additional_charges: Cents,
    #[serde(with = "money::decimal")]
    pub discount_amount: Cents,
    pub payment_status: BookingPaymentStatus,
    #[serde(with = "money::decimal")]
    pub advance_paid: Cents,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub status_changed_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Create a pending booking. The booking number must come from the repository's
    /// per-day counter.
    pub fn new(booking_number: String, request: NewBooking, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_number,
            customer_id: request.customer_id,
            provider_id: request.provider_id,
            service_id: request.service_id,
            schedule: request.schedule,
            location: request.location,
            problem_description: request.problem_description,
            customer_notes: request.customer_notes,
            provider_notes: None,
            status: BookingStatus::Pending,
            priority: request.priority,
            quoted_price: request.quoted_price,
            final_price: None,
            additional_charges: 0,
            discount_amount: 0,
            payment_status: BookingPaymentStatus::Pending,
            advance_paid: 0,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            status_changed_at: now,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// `(final_price or quoted_price) + additional_charges - discount_amount`
    pub fn total_amount(&self) -> Cents {
        self.final_price.unwrap_or(self.quoted_price) + self.additional_charges
            - self.discount_amount
    }

    /// Remaining amount due. Negative when more was paid in advance than the total.
    pub fn balance_amount(&self) -> Cents {
        self.total_amount() - self.advance_paid
    }

    /// True when the scheduled start has passed while the booking was never taken up.
    pub fn is_past_due(&self, now: NaiveDateTime) -> bool {
        matches!(
            self.status,
            BookingStatus::Pending | BookingStatus::Confirmed
        ) && now > self.schedule.starts_at()
    }

    /// Move to `next`, stamping the status-specific timestamp.
    /// Cancellation requires a non-blank reason.
    pub fn apply_transition(
        &mut self,
        next: BookingStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        match next {
            BookingStatus::Accepted => self.assigned_at = Some(at),
            BookingStatus::InProgress => self.started_at = Some(at),
            BookingStatus::Completed => self.completed_at = Some(at),
            BookingStatus::Cancelled => {
                let reason = reason
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or(TransitionError::MissingCancellationReason)?;
                self.cancelled_at = Some(at);
                self.cancellation_reason = Some(reason.to_string());
            }
            _ => {}
        }
        self.status = next;
        self.status_changed_at = at;
        self.updated_at = at;
        Ok(())
    }

    /// Re-derive the payment status from advance vs total.
    pub fn refresh_payment_status(&mut self) {
        self.payment_status = BookingPaymentStatus::derive(self.advance_paid, self.total_amount());
    }

    pub fn record_advance(&mut self, amount: Cents, at: DateTime<Utc>) {
        self.advance_paid += amount;
        self.refresh_payment_status();
        self.updated_at = at;
    }
}

/// A booking together with its derived financial fields, as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    #[serde(with = "money::decimal")]
    pub total_amount: Cents,
    #[serde(with = "money::decimal")]
    pub balance_amount: Cents,
    pub is_past_due: bool,
}

impl BookingView {
    pub fn new(booking: Booking, now: NaiveDateTime) -> Self {
        Self {
            total_amount: booking.total_amount(),
            balance_amount: booking.balance_amount(),
            is_past_due: booking.is_past_due(now),
            booking,
        }
    }
}

/// Date partition used by the per-day booking counter, e.g. "241016".
pub fn booking_date_code(date: NaiveDate) -> String {
    date.format("%y%m%d").to_string()
}

/// `BK` + `yymmdd` + sequence zero-padded to four digits.
pub fn format_booking_number(date: NaiveDate, sequence: i64) -> String {
    format!(
        "{}{}{:04}",
        BOOKING_NUMBER_PREFIX,
        booking_date_code(date),
        sequence
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_booking(quoted: Cents) -> Booking {
        let request = NewBooking {
            customer_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            schedule: Schedule::new(
                NaiveDate::from_ymd_opt(2024, 10, 16).unwrap(),
                NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
                60,
            ),
            location: Location {
                address: "12 MG Road".into(),
                city: "Pune".into(),
                state: "MH".into(),
                postal_code: "411001".into(),
                latitude: None,
                longitude: None,
            },
            problem_description: "Leaking tap".into(),
            quoted_price: quoted,
            priority: Priority::default(),
            customer_notes: None,
        };
        Booking::new("BK2410160001".into(), request, Utc::now())
    }

    #[test]
    fn test_status_roundtrip_and_unknown() {
        for status in BookingStatus::ALL {
            assert_eq!(BookingStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(BookingStatus::from_str("archived"), None);
        assert_eq!(BookingStatus::from_str("Pending"), None);
    }

    #[test]
    fn test_total_amount_uses_quoted_price_without_final() {
        let mut booking = sample_booking(50000);
        booking.additional_charges = 5000;
        booking.discount_amount = 2000;
        assert_eq!(booking.total_amount(), 53000);
    }

    #[test]
    fn test_total_amount_prefers_final_price() {
        let mut booking = sample_booking(50000);
        booking.final_price = Some(45000);
        booking.additional_charges = 1000;
        assert_eq!(booking.total_amount(), 46000);
    }

    #[test]
    fn test_balance_can_go_negative() {
        let mut booking = sample_booking(10000);
        booking.advance_paid = 15000;
        assert_eq!(booking.balance_amount(), -5000);
    }

    #[test]
    fn test_is_past_due_only_for_pending_or_confirmed() {
        let mut booking = sample_booking(10000);
        let later = NaiveDate::from_ymd_opt(2024, 10, 17)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let earlier = NaiveDate::from_ymd_opt(2024, 10, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        assert!(booking.is_past_due(later));
        assert!(!booking.is_past_due(earlier));

        booking.status = BookingStatus::Confirmed;
        assert!(booking.is_past_due(later));

        booking.status = BookingStatus::Accepted;
        assert!(!booking.is_past_due(later));
    }

    #[test]
    fn test_apply_transition_stamps_timestamps() {
        let mut booking = sample_booking(10000);
        let at = Utc::now();

        booking.apply_transition(BookingStatus::Accepted, None, at).unwrap();
        assert_eq!(booking.assigned_at, Some(at));

        booking.apply_transition(BookingStatus::InProgress, None, at).unwrap();
        assert_eq!(booking.started_at, Some(at));

        booking.apply_transition(BookingStatus::Completed, None, at).unwrap();
        assert_eq!(booking.completed_at, Some(at));
        assert_eq!(booking.status, BookingStatus::Completed);
    }

    #[test]
    fn test_cancellation_requires_reason() {
        let mut booking = sample_booking(10000);
        let at = Utc::now();

        let result = booking.apply_transition(BookingStatus::Cancelled, Some("   "), at);
        assert_eq!(result, Err(TransitionError::MissingCancellationReason));
        assert_eq!(booking.status, BookingStatus::Pending);
        assert!(booking.cancelled_at.is_none());

        booking
            .apply_transition(BookingStatus::Cancelled, Some("customer requested"), at)
            .unwrap();
        assert_eq!(booking.cancelled_at, Some(at));
        assert_eq!(booking.cancellation_reason.as_deref(), Some("customer requested"));
    }

    #[test]
    fn test_permissive_policy_allows_anything() {
        let policy = TransitionPolicy::Permissive;
        assert!(policy.check(BookingStatus::Completed, BookingStatus::Pending).is_ok());
    }

    #[test]
    fn test_strict_policy_rejects_leaving_terminal_states() {
        let policy = TransitionPolicy::Strict;
        assert!(policy.check(BookingStatus::Pending, BookingStatus::Confirmed).is_ok());
        assert!(policy.check(BookingStatus::Accepted, BookingStatus::InProgress).is_ok());
        assert_eq!(
            policy.check(BookingStatus::Completed, BookingStatus::Pending),
            Err(TransitionError::Illegal {
                from: BookingStatus::Completed,
                to: BookingStatus::Pending,
            })
        );
        for terminal in BookingStatus::ALL.iter().filter(|s| s.is_terminal()) {
            assert!(terminal.successors().is_empty());
        }
    }

    #[test]
    fn test_payment_status_derivation() {
        assert_eq!(BookingPaymentStatus::derive(0, 10000), BookingPaymentStatus::Pending);
        assert_eq!(BookingPaymentStatus::derive(2500, 10000), BookingPaymentStatus::Partial);
        assert_eq!(BookingPaymentStatus::derive(10000, 10000), BookingPaymentStatus::Paid);
        assert_eq!(BookingPaymentStatus::derive(12000, 10000), BookingPaymentStatus::Paid);
    }

    #[test]
    fn test_booking_number_format() {
        let date = NaiveDate::from_ymd_opt(2024, 10, 16).unwrap();
        assert_eq!(format_booking_number(date, 1), "BK2410160001");
        assert_eq!(format_booking_number(date, 42), "BK2410160042");
        assert_eq!(format_booking_number(date, 12345), "BK24101612345");
    }
}
