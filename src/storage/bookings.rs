use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::domain::{
    Booking, BookingId, BookingPaymentStatus, BookingStatus, BookingStatusHistory, Cents,
    Location, Priority, ProviderId, Schedule, UserId, booking_date_code, format_booking_number,
    money,
};

use super::Repository;
use super::repository::{
    fmt_date, fmt_time, fmt_ts, parse_date, parse_id, parse_minutes, parse_opt_id, parse_opt_ts,
    parse_time, parse_ts,
};

/// Whose bookings a query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingScope {
    All,
    Customer(UserId),
    Provider(ProviderId),
}

impl BookingScope {
    fn clause(&self) -> Option<(&'static str, String)> {
        match self {
            BookingScope::All => None,
            BookingScope::Customer(id) => Some((" AND customer_id = ?", id.to_string())),
            BookingScope::Provider(id) => Some((" AND provider_id = ?", id.to_string())),
        }
    }
}

/// Filter for listing bookings
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub customer: Option<UserId>,
    pub provider: Option<ProviderId>,
    pub status: Option<BookingStatus>,
    pub include_inactive: bool,
    pub limit: Option<usize>,
}

/// Booking counts per status plus revenue from completed bookings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookingStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    #[serde(with = "money::decimal")]
    pub completed_revenue: Cents,
}

impl BookingStats {
    pub fn count(&self, status: BookingStatus) -> i64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

const BOOKING_COLUMNS: &str = r#"
    id, booking_number, customer_id, provider_id, service_id,
    scheduled_date, scheduled_time, duration_minutes,
    address, city, state, postal_code, latitude, longitude,
    problem_description, customer_notes, provider_notes,
    status, priority,
    quoted_price_cents, final_price_cents, additional_charges_cents, discount_amount_cents,
    payment_status, advance_paid_cents,
    assigned_at, started_at, completed_at, cancelled_at, cancellation_reason,
    status_changed_at, is_active, created_at, updated_at
"#;

impl Repository {
    // ========================
    // Booking writes (run inside a caller-owned transaction)
    // ========================

    /// Reserve the next booking number for `date`.
    /// The counter row is upserted and incremented in one statement, so concurrent
    /// callers on the same date serialize on it and never see the same value.
    pub async fn next_booking_number(conn: &mut SqliteConnection, date: NaiveDate) -> Result<String> {
        let row = sqlx::query(
            r#"
            INSERT INTO booking_sequences (date_code, last_value)
            VALUES (?, 1)
            ON CONFLICT(date_code) DO UPDATE SET last_value = last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(booking_date_code(date))
        .fetch_one(&mut *conn)
        .await
        .context("Failed to allocate booking number")?;

        Ok(format_booking_number(date, row.get("last_value")))
    }

    pub async fn insert_booking(conn: &mut SqliteConnection, booking: &Booking) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO bookings ({}) VALUES ({})",
            BOOKING_COLUMNS,
            vec!["?"; 34].join(", ")
        ))
        .bind(booking.id.to_string())
        .bind(&booking.booking_number)
        .bind(booking.customer_id.to_string())
        .bind(booking.provider_id.to_string())
        .bind(booking.service_id.to_string())
        .bind(fmt_date(booking.schedule.date))
        .bind(fmt_time(booking.schedule.time))
        .bind(i64::from(booking.schedule.duration_minutes))
        .bind(&booking.location.address)
        .bind(&booking.location.city)
        .bind(&booking.location.state)
        .bind(&booking.location.postal_code)
        .bind(booking.location.latitude)
        .bind(booking.location.longitude)
        .bind(&booking.problem_description)
        .bind(&booking.customer_notes)
        .bind(&booking.provider_notes)
        .bind(booking.status.as_str())
        .bind(booking.priority.as_str())
        .bind(booking.quoted_price)
        .bind(booking.final_price)
        .bind(booking.additional_charges)
        .bind(booking.discount_amount)
        .bind(booking.payment_status.as_str())
        .bind(booking.advance_paid)
        .bind(booking.assigned_at.map(fmt_ts))
        .bind(booking.started_at.map(fmt_ts))
        .bind(booking.completed_at.map(fmt_ts))
        .bind(booking.cancelled_at.map(fmt_ts))
        .bind(&booking.cancellation_reason)
        .bind(fmt_ts(booking.status_changed_at))
        .bind(booking.is_active)
        .bind(fmt_ts(booking.created_at))
        .bind(fmt_ts(booking.updated_at))
        .execute(&mut *conn)
        .await
        .context("Failed to save booking")?;
        Ok(())
    }

    /// Persist every mutable booking column. Number, parties and creation time never change.
    pub async fn update_booking(conn: &mut SqliteConnection, booking: &Booking) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings SET
                scheduled_date = ?, scheduled_time = ?, duration_minutes = ?,
                provider_notes = ?, status = ?, priority = ?,
                final_price_cents = ?, additional_charges_cents = ?, discount_amount_cents = ?,
                payment_status = ?, advance_paid_cents = ?,
                assigned_at = ?, started_at = ?, completed_at = ?, cancelled_at = ?,
                cancellation_reason = ?, status_changed_at = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(fmt_date(booking.schedule.date))
        .bind(fmt_time(booking.schedule.time))
        .bind(i64::from(booking.schedule.duration_minutes))
        .bind(&booking.provider_notes)
        .bind(booking.status.as_str())
        .bind(booking.priority.as_str())
        .bind(booking.final_price)
        .bind(booking.additional_charges)
        .bind(booking.discount_amount)
        .bind(booking.payment_status.as_str())
        .bind(booking.advance_paid)
        .bind(booking.assigned_at.map(fmt_ts))
        .bind(booking.started_at.map(fmt_ts))
        .bind(booking.completed_at.map(fmt_ts))
        .bind(booking.cancelled_at.map(fmt_ts))
        .bind(&booking.cancellation_reason)
        .bind(fmt_ts(booking.status_changed_at))
        .bind(booking.is_active)
        .bind(fmt_ts(booking.updated_at))
        .bind(booking.id.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to update booking")?;

        if result.rows_affected() != 1 {
            anyhow::bail!("Booking {} vanished during update", booking.id);
        }
        Ok(())
    }

    /// Bump `updated_at` on an active booking, taking the write lock before the
    /// booking is read. Returns false for a missing or inactive booking.
    pub async fn touch_booking(conn: &mut SqliteConnection, id: BookingId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE bookings SET updated_at = ? WHERE id = ? AND is_active = 1")
            .bind(fmt_ts(at))
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to lock booking")?;
        Ok(result.rows_affected() == 1)
    }

    /// Append a history row whose `old_status` is read from the booking in the same
    /// statement. Returns the previous status, or None for a missing/inactive booking.
    pub async fn append_status_history(
        conn: &mut SqliteConnection,
        booking_id: BookingId,
        new_status: BookingStatus,
        changed_by: Option<UserId>,
        notes: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<BookingStatus>> {
        let row = sqlx::query(
            r#"
            INSERT INTO booking_status_history (id, booking_id, old_status, new_status, changed_by, notes, created_at)
            SELECT ?, id, status, ?, ?, ?, ?
            FROM bookings
            WHERE id = ? AND is_active = 1
            RETURNING old_status
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(new_status.as_str())
        .bind(changed_by.map(|id| id.to_string()))
        .bind(notes)
        .bind(fmt_ts(at))
        .bind(booking_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to append booking status history")?;

        row.map(|row| {
            let old: String = row.get("old_status");
            BookingStatus::from_str(&old)
                .ok_or_else(|| anyhow::anyhow!("Invalid stored booking status: {}", old))
        })
        .transpose()
    }

    // ========================
    // Booking reads
    // ========================

    pub async fn fetch_booking(conn: &mut SqliteConnection, id: BookingId) -> Result<Option<Booking>> {
        let row = sqlx::query(&format!("SELECT {} FROM bookings WHERE id = ?", BOOKING_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch booking")?;

        row.as_ref().map(Self::row_to_booking).transpose()
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>> {
        let mut conn = self.pool().acquire().await.context("Failed to acquire connection")?;
        Self::fetch_booking(&mut conn, id).await
    }

    pub async fn get_booking_by_number(&self, number: &str) -> Result<Option<Booking>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bookings WHERE booking_number = ?",
            BOOKING_COLUMNS
        ))
        .bind(number)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch booking by number")?;

        row.as_ref().map(Self::row_to_booking).transpose()
    }

    /// List bookings with optional filters, newest first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>> {
        let mut query = format!("SELECT {} FROM bookings WHERE 1=1", BOOKING_COLUMNS);

        let customer_str = filter.customer.map(|id| id.to_string());
        let provider_str = filter.provider.map(|id| id.to_string());

        if !filter.include_inactive {
            query.push_str(" AND is_active = 1");
        }
        if customer_str.is_some() {
            query.push_str(" AND customer_id = ?");
        }
        if provider_str.is_some() {
            query.push_str(" AND provider_id = ?");
        }
        if filter.status.is_some() {
            query.push_str(" AND status = ?");
        }

        query.push_str(" ORDER BY created_at DESC, booking_number DESC");

        if let Some(lim) = filter.limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);
        if let Some(ref id) = customer_str {
            sql_query = sql_query.bind(id);
        }
        if let Some(ref id) = provider_str {
            sql_query = sql_query.bind(id);
        }
        if let Some(status) = filter.status {
            sql_query = sql_query.bind(status.as_str());
        }

        let rows = sql_query
            .fetch_all(self.pool())
            .await
            .context("Failed to list bookings")?;

        rows.iter().map(Self::row_to_booking).collect()
    }

    /// Active bookings in an upcoming status scheduled on or after `today`.
    pub async fn upcoming_bookings(&self, scope: BookingScope, today: NaiveDate) -> Result<Vec<Booking>> {
        let statuses: Vec<String> = BookingStatus::ALL
            .iter()
            .filter(|s| s.is_upcoming())
            .map(|s| format!("'{}'", s.as_str()))
            .collect();
        let mut query = format!(
            r#"SELECT {} FROM bookings
               WHERE is_active = 1
                 AND scheduled_date >= ?
                 AND status IN ({})"#,
            BOOKING_COLUMNS,
            statuses.join(", ")
        );
        let scope_clause = scope.clause();
        if let Some((clause, _)) = &scope_clause {
            query.push_str(clause);
        }
        query.push_str(" ORDER BY scheduled_date, scheduled_time");

        let mut sql_query = sqlx::query(&query).bind(fmt_date(today));
        if let Some((_, ref id)) = scope_clause {
            sql_query = sql_query.bind(id);
        }

        let rows = sql_query
            .fetch_all(self.pool())
            .await
            .context("Failed to list upcoming bookings")?;

        rows.iter().map(Self::row_to_booking).collect()
    }

    pub async fn booking_stats(&self, scope: BookingScope) -> Result<BookingStats> {
        let mut query = String::from(
            r#"SELECT status,
                      COUNT(*) AS count,
                      COALESCE(SUM(COALESCE(final_price_cents, quoted_price_cents)
                                   + additional_charges_cents - discount_amount_cents), 0) AS amount
               FROM bookings
               WHERE is_active = 1"#,
        );
        let scope_clause = scope.clause();
        if let Some((clause, _)) = &scope_clause {
            query.push_str(clause);
        }
        query.push_str(" GROUP BY status");

        let mut sql_query = sqlx::query(&query);
        if let Some((_, ref id)) = scope_clause {
            sql_query = sql_query.bind(id);
        }

        let rows = sql_query
            .fetch_all(self.pool())
            .await
            .context("Failed to compute booking stats")?;

        let mut stats = BookingStats::default();
        for status in BookingStatus::ALL {
            stats.by_status.insert(status.as_str().to_string(), 0);
        }
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            if status == BookingStatus::Completed.as_str() {
                stats.completed_revenue = row.get("amount");
            }
            stats.total += count;
            stats.by_status.insert(status, count);
        }
        Ok(stats)
    }

    /// Soft delete. Returns false when the booking does not exist or is already inactive.
    pub async fn deactivate_booking(&self, id: BookingId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE bookings SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(id.to_string())
        .execute(self.pool())
        .await
        .context("Failed to deactivate booking")?;
        Ok(result.rows_affected() == 1)
    }

    /// History rows for a booking, newest first. Rows are ordered by append
    /// order; `created_at` is taken before the write lock and may interleave.
    pub async fn list_status_history(&self, booking_id: BookingId) -> Result<Vec<BookingStatusHistory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, booking_id, old_status, new_status, changed_by, notes, created_at
            FROM booking_status_history
            WHERE booking_id = ?
            ORDER BY rowid DESC
            "#,
        )
        .bind(booking_id.to_string())
        .fetch_all(self.pool())
        .await
        .context("Failed to list booking history")?;

        rows.iter().map(Self::row_to_history).collect()
    }

    fn row_to_history(row: &SqliteRow) -> Result<BookingStatusHistory> {
        Ok(BookingStatusHistory {
            id: parse_id(row, "id")?,
            booking_id: parse_id(row, "booking_id")?,
            old_status: parse_status(row, "old_status")?,
            new_status: parse_status(row, "new_status")?,
            changed_by: parse_opt_id(row, "changed_by")?,
            notes: row.get("notes"),
            created_at: parse_ts(row, "created_at")?,
        })
    }

    fn row_to_booking(row: &SqliteRow) -> Result<Booking> {
        let priority_str: String = row.get("priority");
        let payment_status_str: String = row.get("payment_status");

        Ok(Booking {
            id: parse_id(row, "id")?,
            booking_number: row.get("booking_number"),
            customer_id: parse_id(row, "customer_id")?,
            provider_id: parse_id(row, "provider_id")?,
            service_id: parse_id(row, "service_id")?,
            schedule: Schedule {
                date: parse_date(row, "scheduled_date")?,
                time: parse_time(row, "scheduled_time")?,
                duration_minutes: parse_minutes(row, "duration_minutes")?,
            },
            location: Location {
                address: row.get("address"),
                city: row.get("city"),
                state: row.get("state"),
                postal_code: row.get("postal_code"),
                latitude: row.get("latitude"),
                longitude: row.get("longitude"),
            },
            problem_description: row.get("problem_description"),
            customer_notes: row.get("customer_notes"),
            provider_notes: row.get("provider_notes"),
            status: parse_status(row, "status")?,
            priority: Priority::from_str(&priority_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid priority: {}", priority_str))?,
            quoted_price: row.get("quoted_price_cents"),
            final_price: row.get("final_price_cents"),
            additional_charges: row.get("additional_charges_cents"),
            discount_amount: row.get("discount_amount_cents"),
            payment_status: BookingPaymentStatus::from_str(&payment_status_str).ok_or_else(
                || anyhow::anyhow!("Invalid booking payment status: {}", payment_status_str),
            )?,
            advance_paid: row.get("advance_paid_cents"),
            assigned_at: parse_opt_ts(row, "assigned_at")?,
            started_at: parse_opt_ts(row, "started_at")?,
            completed_at: parse_opt_ts(row, "completed_at")?,
            cancelled_at: parse_opt_ts(row, "cancelled_at")?,
            cancellation_reason: row.get("cancellation_reason"),
            status_changed_at: parse_ts(row, "status_changed_at")?,
            is_active: row.get::<i32, _>("is_active") != 0,
            created_at: parse_ts(row, "created_at")?,
            updated_at: parse_ts(row, "updated_at")?,
        })
    }
}

fn parse_status(row: &SqliteRow, column: &str) -> Result<BookingStatus> {
    let raw: String = row.get(column);
    BookingStatus::from_str(&raw).ok_or_else(|| anyhow::anyhow!("Invalid booking status: {}", raw))
}
