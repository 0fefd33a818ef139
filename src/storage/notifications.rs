use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::domain::{
    Notification, NotificationChannel, NotificationId, NotificationPreferences, NotificationType,
    QuietHours, UserId,
};

use super::Repository;
use super::repository::{fmt_time, fmt_ts, parse_id, parse_opt_ts, parse_ts};

/// Read/unread totals for a user's live (unexpired) notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationCounts {
    pub total: i64,
    pub unread: i64,
}

const NOTIFICATION_SELECT: &str = r#"
    SELECT id, user_id, notification_type, channel, title, message, data, action_url, action_text,
           priority, is_read, read_at, is_sent, sent_at, expires_at, created_at
    FROM notifications
"#;

const LIVE: &str = "(expires_at IS NULL OR expires_at > ?)";

impl Repository {
    // ========================
    // Notification operations
    // ========================

    pub async fn save_notification(&self, notification: &Notification) -> Result<()> {
        let data = serde_json::to_string(&notification.data)
            .context("Failed to encode notification data")?;
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, notification_type, channel, title, message, data,
                                       action_url, action_text, priority, is_read, read_at, is_sent,
                                       sent_at, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(notification.id.to_string())
        .bind(notification.user_id.to_string())
        .bind(notification.notification_type.as_str())
        .bind(notification.channel.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(data)
        .bind(&notification.action_url)
        .bind(&notification.action_text)
        .bind(i64::from(notification.priority))
        .bind(notification.is_read)
        .bind(notification.read_at.map(fmt_ts))
        .bind(notification.is_sent)
        .bind(notification.sent_at.map(fmt_ts))
        .bind(notification.expires_at.map(fmt_ts))
        .bind(fmt_ts(notification.created_at))
        .execute(self.pool())
        .await
        .context("Failed to save notification")?;
        Ok(())
    }

    pub async fn get_notification(&self, id: NotificationId) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", NOTIFICATION_SELECT))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch notification")?;

        row.as_ref().map(Self::row_to_notification).transpose()
    }

    /// Newest first, expired ones left out.
    pub async fn list_notifications(
        &self,
        user_id: UserId,
        unread_only: bool,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<Notification>> {
        let mut query = format!("{} WHERE user_id = ? AND {}", NOTIFICATION_SELECT, LIVE);
        if unread_only {
            query.push_str(" AND is_read = 0");
        }
        query.push_str(" ORDER BY created_at DESC, rowid DESC");
        if let Some(lim) = limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let rows = sqlx::query(&query)
            .bind(user_id.to_string())
            .bind(fmt_ts(now))
            .fetch_all(self.pool())
            .await
            .context("Failed to list notifications")?;

        rows.iter().map(Self::row_to_notification).collect()
    }

    pub async fn notification_counts(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<NotificationCounts> {
        let row = sqlx::query(&format!(
            r#"
            SELECT COUNT(*) AS total, COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0) AS unread
            FROM notifications
            WHERE user_id = ? AND {}
            "#,
            LIVE
        ))
        .bind(user_id.to_string())
        .bind(fmt_ts(now))
        .fetch_one(self.pool())
        .await
        .context("Failed to count notifications")?;

        Ok(NotificationCounts {
            total: row.get("total"),
            unread: row.get("unread"),
        })
    }

    /// Mark one of the user's notifications read. False when it is not theirs or
    /// was already read, in which case `read_at` is left alone.
    pub async fn mark_notification_read(
        &self,
        user_id: UserId,
        id: NotificationId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ? WHERE id = ? AND user_id = ? AND is_read = 0",
        )
        .bind(fmt_ts(at))
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(self.pool())
        .await
        .context("Failed to mark notification read")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_all_notifications_read(&self, user_id: UserId, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = ? WHERE user_id = ? AND is_read = 0",
        )
        .bind(fmt_ts(at))
        .bind(user_id.to_string())
        .execute(self.pool())
        .await
        .context("Failed to mark notifications read")?;
        Ok(result.rows_affected())
    }

    /// Unsent notifications on external channels, highest priority then oldest first.
    pub async fn pending_deliveries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "{} WHERE is_sent = 0 AND {} ORDER BY priority DESC, created_at, rowid LIMIT {}",
            NOTIFICATION_SELECT, LIVE, limit
        ))
        .bind(fmt_ts(now))
        .fetch_all(self.pool())
        .await
        .context("Failed to list pending deliveries")?;

        rows.iter().map(Self::row_to_notification).collect()
    }

    /// Returns false when the notification is missing or already sent.
    pub async fn mark_notification_sent(&self, id: NotificationId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET is_sent = 1, sent_at = ? WHERE id = ? AND is_sent = 0")
            .bind(fmt_ts(at))
            .bind(id.to_string())
            .execute(self.pool())
            .await
            .context("Failed to mark notification sent")?;
        Ok(result.rows_affected() == 1)
    }

    fn row_to_notification(row: &SqliteRow) -> Result<Notification> {
        let type_str: String = row.get("notification_type");
        let channel_str: String = row.get("channel");
        let data: String = row.get("data");
        let priority: i64 = row.get("priority");
        Ok(Notification {
            id: parse_id(row, "id")?,
            user_id: parse_id(row, "user_id")?,
            notification_type: NotificationType::from_str(&type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid notification type: {}", type_str))?,
            channel: NotificationChannel::from_str(&channel_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid notification channel: {}", channel_str))?,
            title: row.get("title"),
            message: row.get("message"),
            data: serde_json::from_str(&data).context("Invalid notification data")?,
            action_url: row.get("action_url"),
            action_text: row.get("action_text"),
            priority: u8::try_from(priority)
                .with_context(|| format!("Invalid notification priority {}", priority))?,
            is_read: row.get::<i32, _>("is_read") != 0,
            read_at: parse_opt_ts(row, "read_at")?,
            is_sent: row.get::<i32, _>("is_sent") != 0,
            sent_at: parse_opt_ts(row, "sent_at")?,
            expires_at: parse_opt_ts(row, "expires_at")?,
            created_at: parse_ts(row, "created_at")?,
        })
    }

    // ========================
    // Notification preferences
    // ========================

    pub async fn get_notification_preferences(
        &self,
        user_id: UserId,
    ) -> Result<Option<NotificationPreferences>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, email, sms, push, in_app, booking_updates, payment_updates, review_updates,
                   promotional, system_alerts, quiet_start, quiet_end, dnd_until
            FROM notification_preferences
            WHERE user_id = ?
            "#,
        )
        .bind(user_id.to_string())
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch notification preferences")?;

        row.as_ref().map(Self::row_to_preferences).transpose()
    }

    pub async fn save_notification_preferences(
        &self,
        prefs: &NotificationPreferences,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_preferences (user_id, email, sms, push, in_app, booking_updates,
                                                  payment_updates, review_updates, promotional, system_alerts,
                                                  quiet_start, quiet_end, dnd_until, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                sms = excluded.sms,
                push = excluded.push,
                in_app = excluded.in_app,
                booking_updates = excluded.booking_updates,
                payment_updates = excluded.payment_updates,
                review_updates = excluded.review_updates,
                promotional = excluded.promotional,
                system_alerts = excluded.system_alerts,
                quiet_start = excluded.quiet_start,
                quiet_end = excluded.quiet_end,
                dnd_until = excluded.dnd_until,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(prefs.user_id.to_string())
        .bind(prefs.email)
        .bind(prefs.sms)
        .bind(prefs.push)
        .bind(prefs.in_app)
        .bind(prefs.booking_updates)
        .bind(prefs.payment_updates)
        .bind(prefs.review_updates)
        .bind(prefs.promotional)
        .bind(prefs.system_alerts)
        .bind(prefs.quiet_hours.map(|q| fmt_time(q.start)))
        .bind(prefs.quiet_hours.map(|q| fmt_time(q.end)))
        .bind(prefs.dnd_until.map(fmt_ts))
        .bind(fmt_ts(at))
        .execute(self.pool())
        .await
        .context("Failed to save notification preferences")?;
        Ok(())
    }

    fn row_to_preferences(row: &SqliteRow) -> Result<NotificationPreferences> {
        let flag = |column: &str| row.get::<i32, _>(column) != 0;
        let quiet_start: Option<String> = row.get("quiet_start");
        let quiet_end: Option<String> = row.get("quiet_end");
        let quiet_hours = match (quiet_start, quiet_end) {
            (Some(start), Some(end)) => Some(QuietHours {
                start: chrono::NaiveTime::parse_from_str(&start, "%H:%M:%S")
                    .context("Invalid quiet_start time")?,
                end: chrono::NaiveTime::parse_from_str(&end, "%H:%M:%S")
                    .context("Invalid quiet_end time")?,
            }),
            _ => None,
        };
        Ok(NotificationPreferences {
            user_id: parse_id(row, "user_id")?,
            email: flag("email"),
            sms: flag("sms"),
            push: flag("push"),
            in_app: flag("in_app"),
            booking_updates: flag("booking_updates"),
            payment_updates: flag("payment_updates"),
            review_updates: flag("review_updates"),
            promotional: flag("promotional"),
            system_alerts: flag("system_alerts"),
            quiet_hours,
            dnd_until: parse_opt_ts(row, "dnd_until")?,
        })
    }
}
