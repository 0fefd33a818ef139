use thiserror::Error;

use crate::domain::{BookingStatus, Cents, RefundError, TransitionError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid booking status: {0}")]
    InvalidStatus(String),

    #[error("Illegal status transition from {from} to {to}")]
    IllegalTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("A cancellation reason is required to cancel a booking")]
    MissingCancellationReason,

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Cents, required: Cents },

    #[error("Booking not found: {0}")]
    BookingNotFound(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Review not found: {0}")]
    ReviewNotFound(String),

    #[error("Notification not found: {0}")]
    NotificationNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Wallet is inactive: {0}")]
    WalletInactive(String),

    #[error("Refund of {requested} exceeds refundable amount {refundable}")]
    RefundExceedsPayment { refundable: Cents, requested: Cents },

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("Booking already has a review: {0}")]
    ReviewAlreadyExists(String),

    #[error("User already has a provider profile: {0}")]
    ProviderProfileExists(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::MissingCancellationReason => AppError::MissingCancellationReason,
            TransitionError::Illegal { from, to } => AppError::IllegalTransition { from, to },
        }
    }
}

impl From<RefundError> for AppError {
    fn from(err: RefundError) -> Self {
        match err {
            RefundError::ExceedsPaidAmount {
                paid_amount,
                already_refunded,
                requested,
            } => AppError::RefundExceedsPayment {
                refundable: paid_amount - already_refunded,
                requested,
            },
        }
    }
}
