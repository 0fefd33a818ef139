use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::domain::{DetailedRatings, ProviderId, RatingAggregate, Review, ReviewId};

use super::Repository;
use super::repository::{fmt_ts, parse_id, parse_opt_ts, parse_ts};

const REVIEW_SELECT: &str = r#"
    SELECT id, booking_id, customer_id, provider_id, rating, punctuality, professionalism,
           quality, communication, title, comment, provider_response, responded_at, created_at
    FROM reviews
"#;

impl Repository {
    // ========================
    // Review operations
    // ========================

    /// Insert a review. Returns false when the booking already has one.
    pub async fn insert_review(conn: &mut SqliteConnection, review: &Review) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO reviews (id, booking_id, customer_id, provider_id, rating, punctuality,
                                 professionalism, quality, communication, title, comment,
                                 provider_response, responded_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(booking_id) DO NOTHING
            "#,
        )
        .bind(review.id.to_string())
        .bind(review.booking_id.to_string())
        .bind(review.customer_id.to_string())
        .bind(review.provider_id.to_string())
        .bind(i64::from(review.rating))
        .bind(review.detailed.punctuality.map(i64::from))
        .bind(review.detailed.professionalism.map(i64::from))
        .bind(review.detailed.quality.map(i64::from))
        .bind(review.detailed.communication.map(i64::from))
        .bind(&review.title)
        .bind(&review.comment)
        .bind(&review.provider_response)
        .bind(review.responded_at.map(fmt_ts))
        .bind(fmt_ts(review.created_at))
        .execute(&mut *conn)
        .await
        .context("Failed to save review")?;
        Ok(result.rows_affected() == 1)
    }

    /// Fold one rating into the provider's running totals.
    pub async fn add_provider_rating(
        conn: &mut SqliteConnection,
        provider_id: ProviderId,
        rating: u8,
    ) -> Result<Option<RatingAggregate>> {
        let row = sqlx::query(
            r#"
            UPDATE providers
            SET rating_sum = rating_sum + ?, total_reviews = total_reviews + 1
            WHERE id = ?
            RETURNING rating_sum, total_reviews
            "#,
        )
        .bind(i64::from(rating))
        .bind(provider_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to update provider rating")?;

        Ok(row.map(|row| RatingAggregate {
            rating_sum: row.get("rating_sum"),
            total_reviews: row.get("total_reviews"),
        }))
    }

    /// Replace the provider's running totals with a full recount of its reviews.
    /// None when the provider does not exist.
    pub async fn rebuild_provider_rating(
        &self,
        provider_id: ProviderId,
    ) -> Result<Option<RatingAggregate>> {
        let row = sqlx::query(
            r#"
            UPDATE providers SET
                rating_sum = (SELECT COALESCE(SUM(rating), 0) FROM reviews WHERE provider_id = providers.id),
                total_reviews = (SELECT COUNT(*) FROM reviews WHERE provider_id = providers.id)
            WHERE id = ?
            RETURNING rating_sum, total_reviews
            "#,
        )
        .bind(provider_id.to_string())
        .fetch_optional(self.pool())
        .await
        .context("Failed to rebuild provider rating")?;

        Ok(row.map(|row| RatingAggregate {
            rating_sum: row.get("rating_sum"),
            total_reviews: row.get("total_reviews"),
        }))
    }

    /// Recomputed aggregates for every provider that has at least one review.
    pub async fn recompute_all_ratings(&self) -> Result<HashMap<ProviderId, RatingAggregate>> {
        let rows = sqlx::query(
            r#"
            SELECT provider_id, SUM(rating) AS rating_sum, COUNT(*) AS total_reviews
            FROM reviews
            GROUP BY provider_id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .context("Failed to recompute provider ratings")?;

        let mut aggregates = HashMap::new();
        for row in rows {
            aggregates.insert(
                parse_id(&row, "provider_id")?,
                RatingAggregate {
                    rating_sum: row.get("rating_sum"),
                    total_reviews: row.get("total_reviews"),
                },
            );
        }
        Ok(aggregates)
    }

    pub async fn get_review(&self, id: ReviewId) -> Result<Option<Review>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", REVIEW_SELECT))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch review")?;

        row.as_ref().map(Self::row_to_review).transpose()
    }

    pub async fn list_reviews_for_provider(&self, provider_id: ProviderId) -> Result<Vec<Review>> {
        let rows = sqlx::query(&format!(
            "{} WHERE provider_id = ? ORDER BY created_at DESC",
            REVIEW_SELECT
        ))
        .bind(provider_id.to_string())
        .fetch_all(self.pool())
        .await
        .context("Failed to list reviews")?;

        rows.iter().map(Self::row_to_review).collect()
    }

    pub async fn set_review_response(
        &self,
        id: ReviewId,
        response: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE reviews SET provider_response = ?, responded_at = ? WHERE id = ?")
                .bind(response)
                .bind(fmt_ts(at))
                .bind(id.to_string())
                .execute(self.pool())
                .await
                .context("Failed to save review response")?;
        Ok(result.rows_affected() == 1)
    }

    fn row_to_review(row: &SqliteRow) -> Result<Review> {
        Ok(Review {
            id: parse_id(row, "id")?,
            booking_id: parse_id(row, "booking_id")?,
            customer_id: parse_id(row, "customer_id")?,
            provider_id: parse_id(row, "provider_id")?,
            rating: parse_score(row.get("rating"))?,
            detailed: DetailedRatings {
                punctuality: parse_opt_score(row.get("punctuality"))?,
                professionalism: parse_opt_score(row.get("professionalism"))?,
                quality: parse_opt_score(row.get("quality"))?,
                communication: parse_opt_score(row.get("communication"))?,
            },
            title: row.get("title"),
            comment: row.get("comment"),
            provider_response: row.get("provider_response"),
            responded_at: parse_opt_ts(row, "responded_at")?,
            created_at: parse_ts(row, "created_at")?,
        })
    }
}

fn parse_score(raw: i64) -> Result<u8> {
    u8::try_from(raw).with_context(|| format!("Invalid rating value {}", raw))
}

fn parse_opt_score(raw: Option<i64>) -> Result<Option<u8>> {
    raw.map(parse_score).transpose()
}
