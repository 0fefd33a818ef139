use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{
    Booking, BookingId, BookingPaymentStatus, Cents, Gateway, NewPayment, Payment, PaymentId,
    PaymentMethod, PaymentRefund, PaymentStatus, TransactionType, UserId, WalletTransaction,
    validate_refund,
};
use crate::storage::Repository;

use super::service::{require_positive, require_text};
use super::{AppError, MarketplaceService};

/// Result of a refund
#[derive(Debug, Clone, Serialize)]
pub struct RefundResult {
    pub payment: Payment,
    pub refund: PaymentRefund,
    /// Present when the refund was credited to the payer's wallet.
    pub wallet_transaction: Option<WalletTransaction>,
}

/// Result of settling a booking from the customer's wallet
#[derive(Debug, Clone, Serialize)]
pub struct WalletPayment {
    pub payment: Payment,
    pub transaction: WalletTransaction,
    pub booking: Booking,
}

impl MarketplaceService {
    // ========================
    // Payment operations
    // ========================

    /// Record a pending payment attempt.
    pub async fn create_payment(&self, request: NewPayment) -> Result<Payment, AppError> {
        require_positive(request.amount)?;
        self.get_user(request.user_id).await?;

        let booking_number = match request.booking_id {
            Some(booking_id) => Some(self.get_booking(booking_id).await?.booking_number),
            None => None,
        };
        let currency = request
            .currency
            .clone()
            .filter(|c| !c.trim().is_empty())
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());

        let payment = Payment::new(request, currency, booking_number.as_deref(), Utc::now());
        let mut conn = self
            .repo
            .pool()
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Repository::insert_payment(&mut conn, &payment).await?;

        info!(
            payment_reference = %payment.payment_reference,
            order_reference = %payment.order_reference,
            amount = payment.amount,
            "payment created"
        );
        Ok(payment)
    }

    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment, AppError> {
        self.repo
            .get_payment(id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(id.to_string()))
    }

    pub async fn list_payments(&self) -> Result<Vec<Payment>, AppError> {
        Ok(self.repo.list_payments().await?)
    }

    pub async fn list_payments_for_booking(
        &self,
        booking_id: BookingId,
    ) -> Result<Vec<Payment>, AppError> {
        self.get_booking(booking_id).await?;
        Ok(self.repo.list_payments_for_booking(booking_id).await?)
    }

    pub async fn list_refunds(&self, payment_id: PaymentId) -> Result<Vec<PaymentRefund>, AppError> {
        self.get_payment(payment_id).await?;
        Ok(self.repo.list_refunds(payment_id).await?)
    }

    /// Gateway callback. A successful booking payment is added to the booking's
    /// advance in the same transaction. Refund statuses are reached through
    /// `refund_payment` only.
    pub async fn update_payment_status(
        &self,
        payment_id: PaymentId,
        status: PaymentStatus,
        gateway_payment_id: Option<&str>,
    ) -> Result<Payment, AppError> {
        if matches!(
            status,
            PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
        ) {
            return Err(AppError::InvalidInput(format!(
                "status {} can only be reached by refunding",
                status
            )));
        }

        let now = Utc::now();
        let mut tx = self.repo.begin().await?;
        if !Repository::set_payment_status(&mut *tx, payment_id, status, gateway_payment_id, now)
            .await?
        {
            return Err(match Repository::fetch_payment(&mut *tx, payment_id).await? {
                None => AppError::PaymentNotFound(payment_id.to_string()),
                Some(payment) => AppError::InvalidInput(format!(
                    "payment {} is already {}",
                    payment.payment_reference, payment.status
                )),
            });
        }

        let payment = Repository::fetch_payment(&mut *tx, payment_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))?;

        if let Some(booking_id) = payment.booking_id {
            let mut booking = Repository::fetch_booking(&mut *tx, booking_id)
                .await?
                .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;
            match status {
                PaymentStatus::Success => {
                    booking.record_advance(payment.amount, now);
                    Repository::update_booking(&mut *tx, &booking).await?;
                }
                PaymentStatus::Failed if booking.advance_paid == 0 => {
                    booking.payment_status = BookingPaymentStatus::Failed;
                    booking.updated_at = now;
                    Repository::update_booking(&mut *tx, &booking).await?;
                }
                _ => {}
            }
        }
        tx.commit().await.context("Failed to commit payment status")?;

        info!(
            payment_reference = %payment.payment_reference,
            status = %payment.status,
            "payment status changed"
        );
        Ok(payment)
    }

    /// Refund part or all of a settled payment, optionally crediting the payer's wallet.
    pub async fn refund_payment(
        &self,
        payment_id: PaymentId,
        amount: Cents,
        reason: &str,
        processed_by: Option<UserId>,
        credit_wallet: bool,
    ) -> Result<RefundResult, AppError> {
        require_positive(amount)?;
        let reason = require_text("refund reason", reason.to_string())?;

        let now = Utc::now();
        let mut tx = self.repo.begin().await?;
        if !Repository::apply_payment_refund(&mut *tx, payment_id, amount, &reason, now).await? {
            let payment = Repository::fetch_payment(&mut *tx, payment_id)
                .await?
                .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))?;
            if !payment.is_refundable() {
                return Err(AppError::InvalidInput(format!(
                    "payment {} is {} and cannot be refunded",
                    payment.payment_reference, payment.status
                )));
            }
            validate_refund(payment.amount, payment.refund_amount, amount).map_err(|err| {
                warn!(
                    payment_reference = %payment.payment_reference,
                    refundable = payment.refundable_amount(),
                    requested = amount,
                    "refund rejected: exceeds payment"
                );
                AppError::from(err)
            })?;
            return Err(AppError::InvalidInput(format!(
                "payment {} changed while refunding, retry",
                payment.payment_reference
            )));
        }

        let payment = Repository::fetch_payment(&mut *tx, payment_id)
            .await?
            .ok_or_else(|| AppError::PaymentNotFound(payment_id.to_string()))?;
        let refund = PaymentRefund::new(payment_id, amount, reason, processed_by, now);
        Repository::insert_refund(&mut *tx, &refund).await?;

        if let Some(booking_id) = payment.booking_id {
            let mut booking = Repository::fetch_booking(&mut *tx, booking_id)
                .await?
                .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;
            booking.advance_paid = (booking.advance_paid - amount).max(0);
            if payment.status == PaymentStatus::Refunded && booking.advance_paid == 0 {
                booking.payment_status = BookingPaymentStatus::Refunded;
            } else {
                booking.refresh_payment_status();
            }
            booking.updated_at = now;
            Repository::update_booking(&mut *tx, &booking).await?;
        }

        let wallet_transaction = if credit_wallet {
            let wallet = Self::ensure_wallet(&mut *tx, payment.user_id, &payment.currency).await?;
            let entry = Self::record_movement(
                &mut *tx,
                wallet.id,
                TransactionType::Credit,
                amount,
                &format!("Refund {} for {}", refund.reference, payment.payment_reference),
                Some(payment.id),
                now,
            )
            .await?;
            Some(entry)
        } else {
            None
        };
        tx.commit().await.context("Failed to commit refund")?;

        info!(
            payment_reference = %payment.payment_reference,
            refund_reference = %refund.reference,
            amount,
            status = %payment.status,
            to_wallet = credit_wallet,
            "payment refunded"
        );
        Ok(RefundResult {
            payment,
            refund,
            wallet_transaction,
        })
    }

    /// Debit the customer's wallet and record a settled wallet payment against the booking.
    pub async fn pay_booking_from_wallet(
        &self,
        booking_id: BookingId,
        amount: Cents,
        description: Option<String>,
    ) -> Result<WalletPayment, AppError> {
        require_positive(amount)?;
        let booking = self.get_booking(booking_id).await?;
        let wallet = self.wallet_for_user(booking.customer_id).await?;

        let now = Utc::now();
        let request = NewPayment {
            user_id: booking.customer_id,
            booking_id: Some(booking_id),
            amount,
            currency: Some(wallet.currency.clone()),
            method: PaymentMethod::Wallet,
            gateway: Gateway::Manual,
            description,
        };
        let mut payment = Payment::new(
            request,
            wallet.currency.clone(),
            Some(&booking.booking_number),
            now,
        );
        payment.status = PaymentStatus::Success;
        payment.initiated_at = Some(now);
        payment.completed_at = Some(now);

        // Active check under the write lock
        let mut tx = self.repo.begin().await?;
        if !Repository::touch_booking(&mut *tx, booking_id, now).await? {
            return Err(AppError::BookingNotFound(booking_id.to_string()));
        }
        let change =
            Self::change_balance(&mut *tx, wallet.id, TransactionType::Debit, amount, now).await?;
        Repository::insert_payment(&mut *tx, &payment).await?;
        let transaction = Self::append_ledger_entry(
            &mut *tx,
            wallet.id,
            TransactionType::Debit,
            amount,
            change.balance,
            change.version,
            &format!("Payment {} for {}", payment.payment_reference, booking.booking_number),
            Some(payment.id),
            now,
        )
        .await?;

        let mut booking = Repository::fetch_booking(&mut *tx, booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;
        booking.record_advance(amount, now);
        Repository::update_booking(&mut *tx, &booking).await?;
        tx.commit().await.context("Failed to commit wallet payment")?;

        info!(
            booking_number = %booking.booking_number,
            payment_reference = %payment.payment_reference,
            amount,
            balance = change.balance,
            "booking paid from wallet"
        );
        Ok(WalletPayment {
            payment,
            transaction,
            booking,
        })
    }
}
