use anyhow::Context;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{
    Booking, BookingId, BookingPaymentStatus, BookingStatus, BookingStatusHistory, BookingView,
    Cents, NewBooking, Role, Schedule, UserId,
};
use crate::storage::{BookingFilter, BookingScope, BookingStats, Repository};

use super::service::require_within_limit;
use super::{AppError, MarketplaceService};

/// Result of a status transition
#[derive(Debug, Clone, Serialize)]
pub struct TransitionResult {
    pub booking: Booking,
    pub previous_status: BookingStatus,
}

/// Pricing adjustment applied by the provider.
#[derive(Debug, Clone, Default)]
pub struct PricingUpdate {
    pub final_price: Option<Cents>,
    pub additional_charges: Cents,
    pub discount_amount: Cents,
}

impl MarketplaceService {
    // ========================
    // Booking lifecycle
    // ========================

    /// Create a pending booking with a freshly allocated booking number.
    pub async fn create_booking(&self, request: NewBooking) -> Result<Booking, AppError> {
        let customer = self.get_user(request.customer_id).await?;
        if customer.role != Role::Customer || !customer.is_active {
            return Err(AppError::PermissionDenied(format!(
                "user {} cannot book services",
                customer.id
            )));
        }
        let provider = self.get_provider(request.provider_id).await?;
        let service = self.get_service(request.service_id).await?;
        if service.provider_id != provider.id {
            return Err(AppError::InvalidInput(format!(
                "service {} is not offered by provider {}",
                service.id, provider.id
            )));
        }
        require_price("quoted price", request.quoted_price)?;
        if request.schedule.duration_minutes == 0 {
            return Err(AppError::InvalidInput("duration must be positive".to_string()));
        }

        let now = Utc::now();
        let mut tx = self.repo.begin().await?;
        let number = Repository::next_booking_number(&mut *tx, now.date_naive()).await?;
        let booking = Booking::new(number, request, now);
        Repository::insert_booking(&mut *tx, &booking).await?;
        tx.commit().await.context("Failed to commit booking")?;

        info!(
            booking_number = %booking.booking_number,
            customer_id = %booking.customer_id,
            provider_id = %booking.provider_id,
            "booking created"
        );
        Ok(booking)
    }

    /// Move a booking to `new_status`, appending the history row in the same transaction.
    pub async fn transition_booking(
        &self,
        booking_id: BookingId,
        new_status: &str,
        actor: Option<UserId>,
        note: Option<&str>,
    ) -> Result<TransitionResult, AppError> {
        let status = BookingStatus::from_str(new_status)
            .ok_or_else(|| AppError::InvalidStatus(new_status.to_string()))?;
        self.apply_transition(booking_id, status, None, actor, note).await
    }

    /// Replace the schedule and move the booking to `rescheduled` atomically.
    pub async fn reschedule_booking(
        &self,
        booking_id: BookingId,
        schedule: Schedule,
        actor: Option<UserId>,
        note: Option<&str>,
    ) -> Result<TransitionResult, AppError> {
        if schedule.duration_minutes == 0 {
            return Err(AppError::InvalidInput("duration must be positive".to_string()));
        }
        self.apply_transition(
            booking_id,
            BookingStatus::Rescheduled,
            Some(schedule),
            actor,
            note,
        )
        .await
    }

    async fn apply_transition(
        &self,
        booking_id: BookingId,
        status: BookingStatus,
        schedule: Option<Schedule>,
        actor: Option<UserId>,
        note: Option<&str>,
    ) -> Result<TransitionResult, AppError> {
        let now = Utc::now();
        let mut tx = self.repo.begin().await?;

        let previous_status =
            Repository::append_status_history(&mut *tx, booking_id, status, actor, note, now)
                .await?
                .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;

        if let Err(err) = self.policy.check(previous_status, status) {
            warn!(booking_id = %booking_id, from = %previous_status, to = %status, "transition rejected");
            return Err(err.into());
        }

        let mut booking = Repository::fetch_booking(&mut *tx, booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;
        if let Some(schedule) = schedule {
            booking.schedule = schedule;
        }
        booking.apply_transition(status, note, now)?;
        Repository::update_booking(&mut *tx, &booking).await?;
        tx.commit().await.context("Failed to commit status transition")?;

        info!(
            booking_number = %booking.booking_number,
            from = %previous_status,
            to = %status,
            actor = ?actor,
            "booking status changed"
        );
        Ok(TransitionResult {
            booking,
            previous_status,
        })
    }

    /// Only the provider's own user or an admin may set any status; the booking's
    /// customer may only cancel.
    pub async fn authorize_transition(
        &self,
        actor: UserId,
        booking_id: BookingId,
        new_status: &str,
    ) -> Result<(), AppError> {
        let booking = self.get_booking(booking_id).await?;
        if self.manages_booking(actor, &booking).await? {
            return Ok(());
        }
        if booking.customer_id == actor && new_status == BookingStatus::Cancelled.as_str() {
            return Ok(());
        }
        Err(AppError::PermissionDenied(format!(
            "user {} may not set booking {} to {}",
            actor, booking.booking_number, new_status
        )))
    }

    /// Pricing and other provider-side edits: the provider's own user or an admin.
    pub async fn authorize_booking_management(
        &self,
        actor: UserId,
        booking_id: BookingId,
    ) -> Result<(), AppError> {
        let booking = self.get_booking(booking_id).await?;
        if self.manages_booking(actor, &booking).await? {
            return Ok(());
        }
        Err(AppError::PermissionDenied(format!(
            "user {} does not manage booking {}",
            actor, booking.booking_number
        )))
    }

    async fn manages_booking(&self, actor: UserId, booking: &Booking) -> Result<bool, AppError> {
        let user = self.get_user(actor).await?;
        if user.is_admin() {
            return Ok(true);
        }
        let provider = self.get_provider(booking.provider_id).await?;
        Ok(provider.user_id == user.id)
    }

    pub async fn update_pricing(
        &self,
        booking_id: BookingId,
        update: PricingUpdate,
    ) -> Result<Booking, AppError> {
        if let Some(final_price) = update.final_price {
            require_price("final price", final_price)?;
        }
        require_price("additional charges", update.additional_charges)?;
        require_price("discount", update.discount_amount)?;

        let now = Utc::now();
        let mut tx = self.repo.begin().await?;
        if !Repository::touch_booking(&mut *tx, booking_id, now).await? {
            return Err(AppError::BookingNotFound(booking_id.to_string()));
        }
        let mut booking = Repository::fetch_booking(&mut *tx, booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;

        booking.final_price = update.final_price;
        booking.additional_charges = update.additional_charges;
        booking.discount_amount = update.discount_amount;
        if booking.payment_status != BookingPaymentStatus::Refunded {
            booking.refresh_payment_status();
        }
        booking.updated_at = now;
        Repository::update_booking(&mut *tx, &booking).await?;
        tx.commit().await.context("Failed to commit pricing update")?;

        info!(
            booking_number = %booking.booking_number,
            total = booking.total_amount(),
            "booking pricing updated"
        );
        Ok(booking)
    }

    /// Soft delete. Deactivated bookings stay readable but reject transitions.
    pub async fn deactivate_booking(&self, booking_id: BookingId) -> Result<(), AppError> {
        if !self.repo.deactivate_booking(booking_id).await? {
            return Err(AppError::BookingNotFound(booking_id.to_string()));
        }
        info!(booking_id = %booking_id, "booking deactivated");
        Ok(())
    }

    // ========================
    // Booking queries
    // ========================

    pub async fn get_booking(&self, booking_id: BookingId) -> Result<Booking, AppError> {
        self.repo
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))
    }

    /// The booking with totals, balance and past-due flag derived as of now.
    pub async fn get_booking_view(&self, booking_id: BookingId) -> Result<BookingView, AppError> {
        let booking = self.get_booking(booking_id).await?;
        Ok(BookingView::new(booking, Utc::now().naive_utc()))
    }

    pub async fn get_booking_by_number(&self, number: &str) -> Result<Booking, AppError> {
        self.repo
            .get_booking_by_number(number)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(number.to_string()))
    }

    pub async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, AppError> {
        Ok(self.repo.list_bookings(filter).await?)
    }

    pub async fn upcoming_bookings(
        &self,
        scope: BookingScope,
        today: NaiveDate,
    ) -> Result<Vec<Booking>, AppError> {
        Ok(self.repo.upcoming_bookings(scope, today).await?)
    }

    pub async fn booking_stats(&self, scope: BookingScope) -> Result<BookingStats, AppError> {
        Ok(self.repo.booking_stats(scope).await?)
    }

    /// Status history, newest first.
    pub async fn booking_history(
        &self,
        booking_id: BookingId,
    ) -> Result<Vec<BookingStatusHistory>, AppError> {
        self.get_booking(booking_id).await?;
        Ok(self.repo.list_status_history(booking_id).await?)
    }
}

/// Pricing fields are non-negative and bounded, so derived totals cannot overflow.
fn require_price(field: &str, amount: Cents) -> Result<(), AppError> {
    if amount < 0 {
        return Err(AppError::InvalidAmount(format!("{} cannot be negative", field)));
    }
    require_within_limit(amount)
}
