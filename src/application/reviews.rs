use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{BookingStatus, NewReview, ProviderId, RatingAggregate, Review, ReviewId, UserId};
use crate::storage::Repository;

use super::service::require_text;
use super::{AppError, MarketplaceService};

impl MarketplaceService {
    // ========================
    // Reviews and ratings
    // ========================

    /// Review a completed booking. The provider's running rating totals are
    /// updated in the same transaction as the insert.
    pub async fn submit_review(&self, request: NewReview) -> Result<Review, AppError> {
        request.validate().map_err(AppError::InvalidRating)?;

        let booking = self.get_booking(request.booking_id).await?;
        if !booking.is_active {
            return Err(AppError::BookingNotFound(booking.id.to_string()));
        }
        if booking.customer_id != request.customer_id {
            return Err(AppError::PermissionDenied(format!(
                "user {} did not book {}",
                request.customer_id, booking.booking_number
            )));
        }
        if booking.status != BookingStatus::Completed {
            return Err(AppError::InvalidInput(format!(
                "booking {} is {}, only completed bookings can be reviewed",
                booking.booking_number, booking.status
            )));
        }

        let review = Review::new(request, booking.provider_id, Utc::now());
        let mut tx = self.repo.begin().await?;
        if !Repository::insert_review(&mut *tx, &review).await? {
            return Err(AppError::ReviewAlreadyExists(booking.booking_number));
        }
        let aggregate = Repository::add_provider_rating(&mut *tx, review.provider_id, review.rating)
            .await?
            .ok_or_else(|| AppError::ProviderNotFound(review.provider_id.to_string()))?;
        tx.commit().await.context("Failed to commit review")?;

        info!(
            booking_number = %booking.booking_number,
            provider_id = %review.provider_id,
            rating = review.rating,
            average = aggregate.average(),
            "review submitted"
        );
        Ok(review)
    }

    /// Only the user behind the reviewed provider may respond.
    pub async fn respond_to_review(
        &self,
        review_id: ReviewId,
        provider_user: UserId,
        response: String,
    ) -> Result<Review, AppError> {
        let response = require_text("response", response)?;
        let review = self.get_review(review_id).await?;
        let provider = self.get_provider(review.provider_id).await?;
        if provider.user_id != provider_user {
            return Err(AppError::PermissionDenied(format!(
                "user {} does not own provider {}",
                provider_user, provider.id
            )));
        }

        if !self
            .repo
            .set_review_response(review_id, &response, Utc::now())
            .await?
        {
            return Err(AppError::ReviewNotFound(review_id.to_string()));
        }
        self.get_review(review_id).await
    }

    pub async fn get_review(&self, review_id: ReviewId) -> Result<Review, AppError> {
        self.repo
            .get_review(review_id)
            .await?
            .ok_or_else(|| AppError::ReviewNotFound(review_id.to_string()))
    }

    /// Newest first.
    pub async fn list_reviews(&self, provider_id: ProviderId) -> Result<Vec<Review>, AppError> {
        self.get_provider(provider_id).await?;
        Ok(self.repo.list_reviews_for_provider(provider_id).await?)
    }

    /// Rebuild the provider's totals from its reviews, replacing the running aggregate.
    pub async fn recompute_provider_rating(
        &self,
        provider_id: ProviderId,
    ) -> Result<RatingAggregate, AppError> {
        let before = self.get_provider(provider_id).await?.rating;
        let after = self
            .repo
            .rebuild_provider_rating(provider_id)
            .await?
            .ok_or_else(|| AppError::ProviderNotFound(provider_id.to_string()))?;
        if before != after {
            warn!(
                provider_id = %provider_id,
                stored_sum = before.rating_sum,
                stored_count = before.total_reviews,
                rating_sum = after.rating_sum,
                total_reviews = after.total_reviews,
                "provider rating drift repaired"
            );
        }
        Ok(after)
    }
}
