mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::{Marketplace, test_service};
use homeserve::application::{AppError, NotificationOutcome};
use homeserve::domain::{
    NewNotification, NotificationChannel, NotificationType, QuietHours, Suppression, UserId,
};

fn request(user_id: UserId, kind: NotificationType, title: &str) -> NewNotification {
    NewNotification {
        user_id,
        notification_type: kind,
        channel: NotificationChannel::InApp,
        title: title.to_string(),
        message: format!("{} details", title),
        data: serde_json::json!({ "source": "test" }),
        action_url: None,
        action_text: None,
        priority: 2,
        expires_at: None,
    }
}

fn suppressed(outcome: &NotificationOutcome) -> Option<Suppression> {
    match outcome {
        NotificationOutcome::Suppressed { reason } => Some(*reason),
        NotificationOutcome::Stored { .. } => None,
    }
}

#[tokio::test]
async fn test_notify_stores_and_lists_newest_first() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let user = market.customer.id;

    let first = service
        .notify(request(user, NotificationType::Booking, "Booking confirmed"))
        .await?;
    let stored = first.notification().expect("in-app booking update is stored");
    assert!(stored.is_sent, "in-app notifications count as delivered");
    assert!(stored.sent_at.is_some());
    assert!(!stored.is_read);
    assert_eq!(stored.data["source"], "test");

    service
        .notify(request(user, NotificationType::Payment, "Payment received"))
        .await?;
    service
        .notify(request(
            market.provider_user.id,
            NotificationType::System,
            "Welcome",
        ))
        .await?;

    let listed = service.list_notifications(user, false, None).await?;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].title, "Payment received");
    assert_eq!(listed[1].title, "Booking confirmed");

    let limited = service.list_notifications(user, false, Some(1)).await?;
    assert_eq!(limited.len(), 1);

    let counts = service.notification_counts(user).await?;
    assert_eq!((counts.total, counts.unread), (2, 2));

    // Unknown recipients are rejected
    let err = service
        .notify(request(uuid::Uuid::new_v4(), NotificationType::System, "Hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UserNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_preferences_suppress_without_storing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let user = market.customer.id;

    // Promotions are opt-in
    let outcome = service
        .notify(request(user, NotificationType::Promotional, "Monsoon offer"))
        .await?;
    assert_eq!(suppressed(&outcome), Some(Suppression::TypeDisabled));

    let mut prefs = service.get_notification_preferences(user).await?;
    prefs.sms = false;
    prefs.review_updates = false;
    service.set_notification_preferences(prefs.clone()).await?;

    let mut sms = request(user, NotificationType::Booking, "Technician on the way");
    sms.channel = NotificationChannel::Sms;
    let outcome = service.notify(sms).await?;
    assert_eq!(suppressed(&outcome), Some(Suppression::ChannelDisabled));

    let outcome = service
        .notify(request(user, NotificationType::Review, "Rate your service"))
        .await?;
    assert_eq!(suppressed(&outcome), Some(Suppression::TypeDisabled));

    // Alerts cannot be opted out of by type
    let outcome = service
        .notify(request(user, NotificationType::Alert, "Password changed"))
        .await?;
    assert!(outcome.notification().is_some());

    // Do-not-disturb holds back everything, alerts included
    prefs.dnd_until = Some(Utc::now() + Duration::hours(2));
    service.set_notification_preferences(prefs).await?;
    let outcome = service
        .notify(request(user, NotificationType::Alert, "Another alert"))
        .await?;
    assert_eq!(suppressed(&outcome), Some(Suppression::DoNotDisturb));

    let listed = service.list_notifications(user, false, None).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title, "Password changed");

    Ok(())
}

#[tokio::test]
async fn test_quiet_hours_hold_back_external_channels_only() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let user = market.customer.id;

    let now = Utc::now().time();
    let mut prefs = service.get_notification_preferences(user).await?;
    prefs.quiet_hours = Some(QuietHours {
        start: now - Duration::hours(1),
        end: now + Duration::hours(1),
    });
    service.set_notification_preferences(prefs).await?;

    let mut email = request(user, NotificationType::Booking, "Booking reminder");
    email.channel = NotificationChannel::Email;
    let outcome = service.notify(email).await?;
    assert_eq!(suppressed(&outcome), Some(Suppression::QuietHours));

    let outcome = service
        .notify(request(user, NotificationType::Booking, "Booking reminder"))
        .await?;
    assert!(outcome.notification().is_some());

    Ok(())
}

#[tokio::test]
async fn test_mark_read_keeps_first_timestamp() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let user = market.customer.id;

    let outcome = service
        .notify(request(user, NotificationType::Booking, "Booking confirmed"))
        .await?;
    let id = outcome.notification().expect("stored").id;
    service
        .notify(request(user, NotificationType::Payment, "Payment received"))
        .await?;

    let read = service.mark_notification_read(user, id).await?;
    assert!(read.is_read);
    assert!(read.read_at.is_some());
    let first_read_at = service.get_notification(user, id).await?.read_at;

    let again = service.mark_notification_read(user, id).await?;
    assert_eq!(again.read_at, first_read_at);

    let unread = service.list_notifications(user, true, None).await?;
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].title, "Payment received");
    assert_eq!(service.notification_counts(user).await?.unread, 1);

    // Another user's notification looks missing
    let err = service
        .mark_notification_read(market.provider_user.id, id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotificationNotFound(_)));

    assert_eq!(service.mark_all_notifications_read(user).await?, 1);
    assert_eq!(service.mark_all_notifications_read(user).await?, 0);
    let counts = service.notification_counts(user).await?;
    assert_eq!((counts.total, counts.unread), (2, 0));

    // Marking everything read does not move the first timestamp either
    let stored = service.get_notification(user, id).await?;
    assert_eq!(stored.read_at, first_read_at);

    Ok(())
}

#[tokio::test]
async fn test_external_deliveries_are_sent_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let user = market.customer.id;

    let mut low = request(user, NotificationType::Booking, "Booking confirmed");
    low.channel = NotificationChannel::Email;
    low.priority = 1;
    let low_id = service.notify(low).await?.notification().expect("stored").id;

    let mut urgent = request(user, NotificationType::Alert, "Suspicious login");
    urgent.channel = NotificationChannel::Push;
    urgent.priority = 4;
    let urgent_id = service
        .notify(urgent)
        .await?
        .notification()
        .expect("stored")
        .id;

    // In-app notifications never wait for the sender
    service
        .notify(request(user, NotificationType::System, "Welcome"))
        .await?;

    let pending = service.pending_deliveries(10).await?;
    let ids: Vec<_> = pending.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![urgent_id, low_id]);

    service.mark_notification_sent(urgent_id).await?;
    let err = service.mark_notification_sent(urgent_id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let err = service
        .mark_notification_sent(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotificationNotFound(_)));

    let pending = service.pending_deliveries(10).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, low_id);

    let sent = service.get_notification(user, urgent_id).await?;
    assert!(sent.is_sent);
    assert!(sent.sent_at.is_some());

    Ok(())
}

#[tokio::test]
async fn test_expired_notifications_are_hidden() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let user = market.customer.id;

    let mut stale = request(user, NotificationType::System, "Yesterday's deal");
    stale.expires_at = Some(Utc::now() - Duration::minutes(5));
    let stale_id = service.notify(stale).await?.notification().expect("stored").id;

    let mut fresh = request(user, NotificationType::System, "Maintenance tonight");
    fresh.expires_at = Some(Utc::now() + Duration::days(1));
    service.notify(fresh).await?;

    let listed = service.list_notifications(user, false, None).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title, "Maintenance tonight");
    assert_eq!(service.notification_counts(user).await?.total, 1);

    let err = service.get_notification(user, stale_id).await.unwrap_err();
    assert!(matches!(err, AppError::NotificationNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_notify_validates_input() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let user = market.customer.id;

    let mut blank = request(user, NotificationType::System, "Hello");
    blank.title = "   ".to_string();
    let err = service.notify(blank).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    for priority in [0, 5] {
        let mut bad = request(user, NotificationType::System, "Hello");
        bad.priority = priority;
        let err = service.notify(bad).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    assert!(service.list_notifications(user, false, None).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_preferences_default_and_round_trip() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let market = Marketplace::create(&service).await?;
    let user = market.customer.id;

    let defaults = service.get_notification_preferences(user).await?;
    assert_eq!(defaults.user_id, user);
    assert!(defaults.email && defaults.sms && defaults.push && defaults.in_app);
    assert!(!defaults.promotional);
    assert!(defaults.quiet_hours.is_none());

    let mut prefs = defaults.clone();
    prefs.promotional = true;
    prefs.push = false;
    prefs.quiet_hours = Some(QuietHours::default());
    service.set_notification_preferences(prefs.clone()).await?;
    assert_eq!(service.get_notification_preferences(user).await?, prefs);

    // Saving again replaces the row
    prefs.quiet_hours = None;
    service.set_notification_preferences(prefs.clone()).await?;
    assert_eq!(service.get_notification_preferences(user).await?, prefs);

    let mut empty_window = prefs.clone();
    let ten = common::ten_am();
    empty_window.quiet_hours = Some(QuietHours { start: ten, end: ten });
    let err = service
        .set_notification_preferences(empty_window)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let mut stranger = prefs;
    stranger.user_id = uuid::Uuid::new_v4();
    let err = service
        .set_notification_preferences(stranger)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UserNotFound(_)));

    Ok(())
}
