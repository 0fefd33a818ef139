use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{
    MAX_NOTIFICATION_PRIORITY, MIN_NOTIFICATION_PRIORITY, NewNotification, Notification,
    NotificationId, NotificationPreferences, Suppression, UserId,
};
use crate::storage::NotificationCounts;

use super::service::require_text;
use super::{AppError, MarketplaceService};

/// What happened to a notification request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Stored { notification: Notification },
    Suppressed { reason: Suppression },
}

impl NotificationOutcome {
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            NotificationOutcome::Stored { notification } => Some(notification),
            NotificationOutcome::Suppressed { .. } => None,
        }
    }
}

impl MarketplaceService {
    // ========================
    // Notifications
    // ========================

    /// Record a notification unless the recipient's preferences hold it back.
    /// In-app notifications count as sent once stored; other channels wait in
    /// [`pending_deliveries`](Self::pending_deliveries) for the external sender.
    pub async fn notify(&self, request: NewNotification) -> Result<NotificationOutcome, AppError> {
        let mut request = request;
        request.title = require_text("title", request.title)?;
        request.message = require_text("message", request.message)?;
        if !(MIN_NOTIFICATION_PRIORITY..=MAX_NOTIFICATION_PRIORITY).contains(&request.priority) {
            return Err(AppError::InvalidInput(format!(
                "priority must be between {} and {}, got {}",
                MIN_NOTIFICATION_PRIORITY, MAX_NOTIFICATION_PRIORITY, request.priority
            )));
        }
        self.get_user(request.user_id).await?;

        let now = Utc::now();
        let prefs = self.get_notification_preferences(request.user_id).await?;
        if let Err(reason) = prefs.check(request.notification_type, request.channel, now) {
            debug!(
                user_id = %request.user_id,
                kind = %request.notification_type,
                channel = %request.channel,
                %reason,
                "notification suppressed"
            );
            return Ok(NotificationOutcome::Suppressed { reason });
        }

        let notification = Notification::new(request, now);
        self.repo.save_notification(&notification).await?;
        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            kind = %notification.notification_type,
            channel = %notification.channel,
            "notification stored"
        );
        Ok(NotificationOutcome::Stored { notification })
    }

    /// One of the user's own, unexpired notifications.
    pub async fn get_notification(
        &self,
        user_id: UserId,
        id: NotificationId,
    ) -> Result<Notification, AppError> {
        self.repo
            .get_notification(id)
            .await?
            .filter(|n| n.user_id == user_id && !n.is_expired(Utc::now()))
            .ok_or_else(|| AppError::NotificationNotFound(id.to_string()))
    }

    /// Newest first.
    pub async fn list_notifications(
        &self,
        user_id: UserId,
        unread_only: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Notification>, AppError> {
        self.get_user(user_id).await?;
        Ok(self
            .repo
            .list_notifications(user_id, unread_only, Utc::now(), limit)
            .await?)
    }

    pub async fn notification_counts(&self, user_id: UserId) -> Result<NotificationCounts, AppError> {
        self.get_user(user_id).await?;
        Ok(self.repo.notification_counts(user_id, Utc::now()).await?)
    }

    /// Idempotent: reading twice keeps the first `read_at`.
    pub async fn mark_notification_read(
        &self,
        user_id: UserId,
        id: NotificationId,
    ) -> Result<Notification, AppError> {
        let mut notification = self.get_notification(user_id, id).await?;
        let now = Utc::now();
        if notification.mark_read(now) && !self.repo.mark_notification_read(user_id, id, now).await? {
            // Read concurrently; return the stored timestamp
            return self.get_notification(user_id, id).await;
        }
        Ok(notification)
    }

    /// Returns how many were unread.
    pub async fn mark_all_notifications_read(&self, user_id: UserId) -> Result<u64, AppError> {
        self.get_user(user_id).await?;
        let marked = self
            .repo
            .mark_all_notifications_read(user_id, Utc::now())
            .await?;
        info!(user_id = %user_id, marked, "notifications marked read");
        Ok(marked)
    }

    /// Unsent external-channel notifications, highest priority first.
    pub async fn pending_deliveries(&self, limit: usize) -> Result<Vec<Notification>, AppError> {
        Ok(self.repo.pending_deliveries(Utc::now(), limit).await?)
    }

    /// Called by the external sender once a notification went out.
    pub async fn mark_notification_sent(&self, id: NotificationId) -> Result<(), AppError> {
        if !self.repo.mark_notification_sent(id, Utc::now()).await? {
            let exists = self.repo.get_notification(id).await?.is_some();
            return Err(if exists {
                AppError::InvalidInput(format!("notification {} was already sent", id))
            } else {
                AppError::NotificationNotFound(id.to_string())
            });
        }
        Ok(())
    }

    /// Stored preferences, or the defaults for users who never set any.
    pub async fn get_notification_preferences(
        &self,
        user_id: UserId,
    ) -> Result<NotificationPreferences, AppError> {
        Ok(self
            .repo
            .get_notification_preferences(user_id)
            .await?
            .unwrap_or_else(|| NotificationPreferences::for_user(user_id)))
    }

    pub async fn set_notification_preferences(
        &self,
        prefs: NotificationPreferences,
    ) -> Result<NotificationPreferences, AppError> {
        self.get_user(prefs.user_id).await?;
        if prefs.quiet_hours.is_some_and(|q| q.start == q.end) {
            return Err(AppError::InvalidInput(
                "quiet hours must start and end at different times".to_string(),
            ));
        }
        self.repo
            .save_notification_preferences(&prefs, Utc::now())
            .await?;
        info!(user_id = %prefs.user_id, "notification preferences updated");
        Ok(prefs)
    }

    /// Per-user resources (notifications, preferences): the user or an admin.
    pub async fn authorize_user_access(&self, actor: UserId, user_id: UserId) -> Result<(), AppError> {
        if actor == user_id || self.get_user(actor).await?.is_admin() {
            return Ok(());
        }
        Err(AppError::PermissionDenied(format!(
            "user {} may not act for user {}",
            actor, user_id
        )))
    }
}
