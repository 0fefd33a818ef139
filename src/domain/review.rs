use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BookingId, ProviderId, UserId};

pub type ReviewId = Uuid;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// Optional per-aspect scores, each 1..=5.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedRatings {
    pub punctuality: Option<u8>,
    pub professionalism: Option<u8>,
    pub quality: Option<u8>,
    pub communication: Option<u8>,
}

impl DetailedRatings {
    fn values(&self) -> impl Iterator<Item = u8> {
        [
            self.punctuality,
            self.professionalism,
            self.quality,
            self.communication,
        ]
        .into_iter()
        .flatten()
    }

    /// Mean of the aspects that were given, rounded to two decimals.
    pub fn average(&self) -> Option<f64> {
        let values: Vec<u8> = self.values().collect();
        if values.is_empty() {
            return None;
        }
        let sum: u32 = values.iter().map(|v| u32::from(*v)).sum();
        Some(round2(f64::from(sum) / values.len() as f64))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    pub booking_id: BookingId,
    pub customer_id: UserId,
    pub rating: u8,
    #[serde(default)]
    pub detailed: DetailedRatings,
    #[serde(default)]
    pub title: Option<String>,
    pub comment: String,
}

impl NewReview {
    /// Every supplied score must lie within 1..=5.
    pub fn validate(&self) -> Result<(), u8> {
        validate_rating(self.rating)?;
        self.detailed.values().try_for_each(validate_rating)
    }
}

pub fn validate_rating(rating: u8) -> Result<(), u8> {
    if (MIN_RATING..=MAX_RATING).contains(&rating) {
        Ok(())
    } else {
        Err(rating)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub booking_id: BookingId,
    pub customer_id: UserId,
    pub provider_id: ProviderId,
    pub rating: u8,
    pub detailed: DetailedRatings,
    pub title: Option<String>,
    pub comment: String,
    pub provider_response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Review {
    pub fn new(request: NewReview, provider_id: ProviderId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id: request.booking_id,
            customer_id: request.customer_id,
            provider_id,
            rating: request.rating,
            detailed: request.detailed,
            title: request.title,
            comment: request.comment,
            provider_response: None,
            responded_at: None,
            created_at: now,
        }
    }
}

/// Running rating totals for a provider. Only sum and count are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingAggregate {
    pub rating_sum: i64,
    pub total_reviews: i64,
}

impl RatingAggregate {
    pub fn from_ratings(ratings: &[u8]) -> Self {
        ratings.iter().fold(Self::default(), |agg, r| agg.add(*r))
    }

    pub fn add(self, rating: u8) -> Self {
        Self {
            rating_sum: self.rating_sum + i64::from(rating),
            total_reviews: self.total_reviews + 1,
        }
    }

    /// sum / count rounded to two decimals, 0 with no reviews.
    pub fn average(&self) -> f64 {
        if self.total_reviews == 0 {
            return 0.0;
        }
        round2(self.rating_sum as f64 / self.total_reviews as f64)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
