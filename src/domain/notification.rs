use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

pub type NotificationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    System,
    Booking,
    Payment,
    Review,
    Promotional,
    Alert,
}

impl NotificationType {
    pub const ALL: [NotificationType; 6] = [
        NotificationType::System,
        NotificationType::Booking,
        NotificationType::Payment,
        NotificationType::Review,
        NotificationType::Promotional,
        NotificationType::Alert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::System => "system",
            NotificationType::Booking => "booking",
            NotificationType::Payment => "payment",
            NotificationType::Review => "review",
            NotificationType::Promotional => "promotional",
            NotificationType::Alert => "alert",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    #[default]
    InApp,
    Email,
    Sms,
    Push,
}

impl NotificationChannel {
    pub const ALL: [NotificationChannel; 4] = [
        NotificationChannel::InApp,
        NotificationChannel::Email,
        NotificationChannel::Sms,
        NotificationChannel::Push,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::InApp => "in_app",
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::Push => "push",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.as_str() == s)
    }

    /// In-app notifications are delivered by being stored; the other channels
    /// are handed to an external sender.
    pub fn is_external(&self) -> bool {
        !matches!(self, NotificationChannel::InApp)
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lowest and highest notification priority (low ... urgent).
pub const MIN_NOTIFICATION_PRIORITY: u8 = 1;
pub const MAX_NOTIFICATION_PRIORITY: u8 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    pub title: String,
    pub message: String,
    /// Free-form payload for the client (booking number, payment reference, ...)
    pub data: serde_json::Value,
    pub action_url: Option<String>,
    pub action_text: Option<String>,
    pub priority: u8,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewNotification {
    pub user_id: UserId,
    pub notification_type: NotificationType,
    #[serde(default)]
    pub channel: NotificationChannel,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub action_url: Option<String>,
    #[serde(default)]
    pub action_text: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_priority() -> u8 {
    MIN_NOTIFICATION_PRIORITY
}

impl Notification {
    pub fn new(request: NewNotification, at: DateTime<Utc>) -> Self {
        let delivered = !request.channel.is_external();
        Self {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            notification_type: request.notification_type,
            channel: request.channel,
            title: request.title,
            message: request.message,
            data: request.data,
            action_url: request.action_url,
            action_text: request.action_text,
            priority: request.priority,
            is_read: false,
            read_at: None,
            is_sent: delivered,
            sent_at: delivered.then_some(at),
            expires_at: request.expires_at,
            created_at: at,
        }
    }

    /// Returns false when it was already read; `read_at` keeps the first read.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.read_at = Some(at);
        true
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Daily window, possibly wrapping past midnight (22:00 - 08:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::MIN + TimeDelta::hours(22),
            end: NaiveTime::MIN + TimeDelta::hours(8),
        }
    }
}

/// Why a notification was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Suppression {
    DoNotDisturb,
    ChannelDisabled,
    TypeDisabled,
    QuietHours,
}

impl std::fmt::Display for Suppression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Suppression::DoNotDisturb => "do not disturb is on",
            Suppression::ChannelDisabled => "channel disabled",
            Suppression::TypeDisabled => "notification type disabled",
            Suppression::QuietHours => "inside quiet hours",
        };
        write!(f, "{}", text)
    }
}

/// Per-user opt-outs. A user without a stored row gets [`NotificationPreferences::for_user`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Taken from the route or caller, never from a request body
    #[serde(skip_deserializing)]
    pub user_id: UserId,
    pub email: bool,
    pub sms: bool,
    pub push: bool,
    pub in_app: bool,
    pub booking_updates: bool,
    pub payment_updates: bool,
    pub review_updates: bool,
    pub promotional: bool,
    pub system_alerts: bool,
    /// Checked against UTC wall-clock time
    pub quiet_hours: Option<QuietHours>,
    pub dnd_until: Option<DateTime<Utc>>,
}

impl NotificationPreferences {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id,
            email: true,
            sms: true,
            push: true,
            in_app: true,
            booking_updates: true,
            payment_updates: true,
            review_updates: true,
            promotional: false,
            system_alerts: true,
            quiet_hours: None,
            dnd_until: None,
        }
    }

    fn channel_enabled(&self, channel: NotificationChannel) -> bool {
        match channel {
            NotificationChannel::InApp => self.in_app,
            NotificationChannel::Email => self.email,
            NotificationChannel::Sms => self.sms,
            NotificationChannel::Push => self.push,
        }
    }

    fn type_enabled(&self, kind: NotificationType) -> bool {
        match kind {
            NotificationType::Booking => self.booking_updates,
            NotificationType::Payment => self.payment_updates,
            NotificationType::Review => self.review_updates,
            NotificationType::Promotional => self.promotional,
            NotificationType::System => self.system_alerts,
            NotificationType::Alert => true,
        }
    }

    /// Checks in order: do-not-disturb, channel, type, then quiet hours.
    /// Quiet hours hold back external channels only.
    pub fn check(
        &self,
        kind: NotificationType,
        channel: NotificationChannel,
        now: DateTime<Utc>,
    ) -> Result<(), Suppression> {
        if self.dnd_until.is_some_and(|until| now < until) {
            return Err(Suppression::DoNotDisturb);
        }
        if !self.channel_enabled(channel) {
            return Err(Suppression::ChannelDisabled);
        }
        if !self.type_enabled(kind) {
            return Err(Suppression::TypeDisabled);
        }
        if channel.is_external() && self.quiet_hours.is_some_and(|q| q.contains(now.time())) {
            return Err(Suppression::QuietHours);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, hour, minute, 0).unwrap()
    }

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn test_defaults_allow_everything_but_promotions() {
        let prefs = NotificationPreferences::for_user(Uuid::new_v4());
        for channel in NotificationChannel::ALL {
            assert_eq!(prefs.check(NotificationType::Booking, channel, at(12, 0)), Ok(()));
        }
        assert_eq!(
            prefs.check(NotificationType::Promotional, NotificationChannel::Email, at(12, 0)),
            Err(Suppression::TypeDisabled)
        );
    }

    #[test]
    fn test_do_not_disturb_wins() {
        let mut prefs = NotificationPreferences::for_user(Uuid::new_v4());
        prefs.dnd_until = Some(at(18, 0));
        assert_eq!(
            prefs.check(NotificationType::Alert, NotificationChannel::InApp, at(17, 59)),
            Err(Suppression::DoNotDisturb)
        );
        assert_eq!(
            prefs.check(NotificationType::Alert, NotificationChannel::InApp, at(18, 0)),
            Ok(())
        );
    }

    #[test]
    fn test_channel_checked_before_type() {
        let mut prefs = NotificationPreferences::for_user(Uuid::new_v4());
        prefs.sms = false;
        prefs.payment_updates = false;
        assert_eq!(
            prefs.check(NotificationType::Payment, NotificationChannel::Sms, at(12, 0)),
            Err(Suppression::ChannelDisabled)
        );
        assert_eq!(
            prefs.check(NotificationType::Payment, NotificationChannel::Email, at(12, 0)),
            Err(Suppression::TypeDisabled)
        );
        // Alerts have no opt-out
        prefs.system_alerts = false;
        assert_eq!(
            prefs.check(NotificationType::Alert, NotificationChannel::Email, at(12, 0)),
            Ok(())
        );
    }

    #[test]
    fn test_quiet_hours_wrap_midnight() {
        let quiet = QuietHours::default();
        assert!(quiet.contains(time(22, 0)));
        assert!(quiet.contains(time(3, 30)));
        assert!(!quiet.contains(time(8, 0)));
        assert!(!quiet.contains(time(12, 0)));

        let lunch = QuietHours {
            start: time(12, 0),
            end: time(13, 0),
        };
        assert!(lunch.contains(time(12, 30)));
        assert!(!lunch.contains(time(13, 0)));
    }

    #[test]
    fn test_quiet_hours_hold_back_external_channels_only() {
        let mut prefs = NotificationPreferences::for_user(Uuid::new_v4());
        prefs.quiet_hours = Some(QuietHours::default());
        assert_eq!(
            prefs.check(NotificationType::Booking, NotificationChannel::Push, at(23, 15)),
            Err(Suppression::QuietHours)
        );
        assert_eq!(
            prefs.check(NotificationType::Booking, NotificationChannel::InApp, at(23, 15)),
            Ok(())
        );
    }

    #[test]
    fn test_mark_read_keeps_first_timestamp() {
        let request = NewNotification {
            user_id: Uuid::new_v4(),
            notification_type: NotificationType::Booking,
            channel: NotificationChannel::InApp,
            title: "Booking confirmed".into(),
            message: "See you tomorrow".into(),
            data: serde_json::Value::Null,
            action_url: None,
            action_text: None,
            priority: 2,
            expires_at: Some(at(12, 0) + Duration::days(1)),
        };
        let mut notification = Notification::new(request, at(12, 0));
        assert!(notification.is_sent);
        assert_eq!(notification.sent_at, Some(at(12, 0)));
        assert!(!notification.is_expired(at(13, 0)));
        assert!(notification.is_expired(at(12, 0) + Duration::days(1)));

        assert!(notification.mark_read(at(12, 5)));
        assert!(!notification.mark_read(at(12, 10)));
        assert_eq!(notification.read_at, Some(at(12, 5)));
    }
}
