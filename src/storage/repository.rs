use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::{
    Provider, ProviderId, RatingAggregate, Role, Service, ServiceId, User, UserId,
    VerificationStatus,
};

use super::MIGRATION_001_INITIAL;

const MAX_CONNECTIONS: u32 = 8;

/// Repository for persisting and querying marketplace state.
///
/// Multi-step writes run inside a transaction obtained from [`Repository::begin`];
/// the associated functions taking `&mut SqliteConnection` are the building blocks
/// for those units and never commit on their own.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL. `?mode=rwc` creates the file if missing.
    pub async fn connect(database_url: &str, busy_timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str, busy_timeout: Duration) -> Result<Self> {
        let repo = Self::connect(database_url, busy_timeout).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.context("Failed to begin transaction")
    }

    // ========================
    // User operations
    // ========================

    pub async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, phone, role, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(fmt_ts(user.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to save user")?;
        Ok(())
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, phone, role, is_active, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, email, phone, role, is_active, created_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by email")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        let role_str: String = row.get("role");
        Ok(User {
            id: parse_id(row, "id")?,
            name: row.get("name"),
            email: row.get("email"),
            phone: row.get("phone"),
            role: Role::from_str(&role_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid role: {}", role_str))?,
            is_active: row.get::<i32, _>("is_active") != 0,
            created_at: parse_ts(row, "created_at")?,
        })
    }

    // ========================
    // Provider operations
    // ========================

    pub async fn save_provider(&self, provider: &Provider) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO providers (id, user_id, business_name, city, is_available, verification_status,
                                   hourly_rate_cents, rating_sum, total_reviews, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(provider.id.to_string())
        .bind(provider.user_id.to_string())
        .bind(&provider.business_name)
        .bind(&provider.city)
        .bind(provider.is_available)
        .bind(provider.verification_status.as_str())
        .bind(provider.hourly_rate)
        .bind(provider.rating.rating_sum)
        .bind(provider.rating.total_reviews)
        .bind(fmt_ts(provider.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to save provider")?;
        Ok(())
    }

    pub async fn get_provider(&self, id: ProviderId) -> Result<Option<Provider>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", PROVIDER_SELECT))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch provider")?;

        row.as_ref().map(Self::row_to_provider).transpose()
    }

    pub async fn get_provider_by_user(&self, user_id: UserId) -> Result<Option<Provider>> {
        let row = sqlx::query(&format!("{} WHERE user_id = ?", PROVIDER_SELECT))
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch provider by user")?;

        row.as_ref().map(Self::row_to_provider).transpose()
    }

    pub async fn list_providers(&self) -> Result<Vec<Provider>> {
        let rows = sqlx::query(&format!("{} ORDER BY business_name", PROVIDER_SELECT))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list providers")?;

        rows.iter().map(Self::row_to_provider).collect()
    }

    /// Returns false when no provider has that ID.
    pub async fn set_provider_availability(&self, id: ProviderId, available: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE providers SET is_available = ? WHERE id = ?")
            .bind(available)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update provider availability")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_provider_verification(
        &self,
        id: ProviderId,
        status: VerificationStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE providers SET verification_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update provider verification")?;
        Ok(result.rows_affected() == 1)
    }

    pub(super) fn row_to_provider(row: &SqliteRow) -> Result<Provider> {
        let status_str: String = row.get("verification_status");
        Ok(Provider {
            id: parse_id(row, "id")?,
            user_id: parse_id(row, "user_id")?,
            business_name: row.get("business_name"),
            city: row.get("city"),
            is_available: row.get::<i32, _>("is_available") != 0,
            verification_status: VerificationStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid verification status: {}", status_str))?,
            hourly_rate: row.get("hourly_rate_cents"),
            rating: RatingAggregate {
                rating_sum: row.get("rating_sum"),
                total_reviews: row.get("total_reviews"),
            },
            created_at: parse_ts(row, "created_at")?,
        })
    }

    // ========================
    // Service operations
    // ========================

    pub async fn save_service(&self, service: &Service) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO services (id, provider_id, title, category, base_price_cents, duration_minutes, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(service.id.to_string())
        .bind(service.provider_id.to_string())
        .bind(&service.title)
        .bind(&service.category)
        .bind(service.base_price)
        .bind(i64::from(service.duration_minutes))
        .bind(service.is_active)
        .bind(fmt_ts(service.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to save service")?;
        Ok(())
    }

    pub async fn get_service(&self, id: ServiceId) -> Result<Option<Service>> {
        let row = sqlx::query(
            r#"
            SELECT id, provider_id, title, category, base_price_cents, duration_minutes, is_active, created_at
            FROM services
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch service")?;

        row.as_ref().map(Self::row_to_service).transpose()
    }

    pub async fn list_services_for_provider(&self, provider_id: ProviderId) -> Result<Vec<Service>> {
        let rows = sqlx::query(
            r#"
            SELECT id, provider_id, title, category, base_price_cents, duration_minutes, is_active, created_at
            FROM services
            WHERE provider_id = ?
            ORDER BY title
            "#,
        )
        .bind(provider_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list services")?;

        rows.iter().map(Self::row_to_service).collect()
    }

    fn row_to_service(row: &SqliteRow) -> Result<Service> {
        Ok(Service {
            id: parse_id(row, "id")?,
            provider_id: parse_id(row, "provider_id")?,
            title: row.get("title"),
            category: row.get("category"),
            base_price: row.get("base_price_cents"),
            duration_minutes: parse_minutes(row, "duration_minutes")?,
            is_active: row.get::<i32, _>("is_active") != 0,
            created_at: parse_ts(row, "created_at")?,
        })
    }
}

const PROVIDER_SELECT: &str = r#"
    SELECT id, user_id, business_name, city, is_available, verification_status,
           hourly_rate_cents, rating_sum, total_reviews, created_at
    FROM providers
"#;

// Column codecs shared by the storage modules. Timestamps are fixed-width
// RFC 3339 (microseconds, `Z`) so they sort lexically.

pub(super) fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(super) fn fmt_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

pub(super) fn parse_id(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.get(column);
    Uuid::parse_str(&raw).with_context(|| format!("Invalid {} UUID", column))
}

pub(super) fn parse_opt_id(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let raw: Option<String> = row.get(column);
    raw.map(|s| Uuid::parse_str(&s))
        .transpose()
        .with_context(|| format!("Invalid {} UUID", column))
}

pub(super) fn parse_ts(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&raw)
        .with_context(|| format!("Invalid {} timestamp", column))?
        .with_timezone(&Utc))
}

pub(super) fn parse_opt_ts(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column);
    raw.map(|s| DateTime::parse_from_rfc3339(&s))
        .transpose()
        .with_context(|| format!("Invalid {} timestamp", column))
        .map(|dt| dt.map(|dt| dt.with_timezone(&Utc)))
}

pub(super) fn parse_date(row: &SqliteRow, column: &str) -> Result<NaiveDate> {
    let raw: String = row.get(column);
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").with_context(|| format!("Invalid {} date", column))
}

pub(super) fn parse_time(row: &SqliteRow, column: &str) -> Result<NaiveTime> {
    let raw: String = row.get(column);
    NaiveTime::parse_from_str(&raw, "%H:%M:%S").with_context(|| format!("Invalid {} time", column))
}

pub(super) fn parse_minutes(row: &SqliteRow, column: &str) -> Result<u32> {
    let raw: i64 = row.get(column);
    u32::try_from(raw).with_context(|| format!("Invalid {} value {}", column, raw))
}
