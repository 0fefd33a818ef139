use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::application::NotificationOutcome;
use crate::domain::{NewNotification, Notification, NotificationId, NotificationPreferences, UserId};
use crate::storage::NotificationCounts;

use super::{ApiResult, AppState, require_actor};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(notify))
        .route("/notifications/pending", get(pending_deliveries))
        .route("/notifications/:id/sent", post(mark_sent))
        .route("/users/:id/notifications", get(list_notifications))
        .route("/users/:id/notifications/counts", get(notification_counts))
        .route("/users/:id/notifications/read", post(mark_all_read))
        .route("/users/:id/notifications/:notification_id/read", post(mark_read))
        .route(
            "/users/:id/notification-preferences",
            get(get_preferences).put(set_preferences),
        )
}

// Sender-facing endpoints; callers are internal services.

async fn notify(
    State(state): State<AppState>,
    Json(request): Json<NewNotification>,
) -> ApiResult<(StatusCode, Json<NotificationOutcome>)> {
    let outcome = state.service.notify(request).await?;
    let status = match outcome {
        NotificationOutcome::Stored { .. } => StatusCode::CREATED,
        NotificationOutcome::Suppressed { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
struct PendingQuery {
    limit: Option<usize>,
}

async fn pending_deliveries(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    let limit = query.limit.unwrap_or(100);
    Ok(Json(state.service.pending_deliveries(limit).await?))
}

async fn mark_sent(
    State(state): State<AppState>,
    Path(id): Path<NotificationId>,
) -> ApiResult<StatusCode> {
    state.service.mark_notification_sent(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// User-facing endpoints: the user themselves or an admin.

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    unread: bool,
    limit: Option<usize>,
}

async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    let actor = require_actor(&headers)?;
    state.service.authorize_user_access(actor, user_id).await?;
    Ok(Json(
        state
            .service
            .list_notifications(user_id, query.unread, query.limit)
            .await?,
    ))
}

async fn notification_counts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<NotificationCounts>> {
    let actor = require_actor(&headers)?;
    state.service.authorize_user_access(actor, user_id).await?;
    Ok(Json(state.service.notification_counts(user_id).await?))
}

async fn mark_all_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<Value>> {
    let actor = require_actor(&headers)?;
    state.service.authorize_user_access(actor, user_id).await?;
    let marked = state.service.mark_all_notifications_read(user_id).await?;
    Ok(Json(json!({ "marked": marked })))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((user_id, notification_id)): Path<(UserId, NotificationId)>,
) -> ApiResult<Json<Notification>> {
    let actor = require_actor(&headers)?;
    state.service.authorize_user_access(actor, user_id).await?;
    Ok(Json(
        state
            .service
            .mark_notification_read(user_id, notification_id)
            .await?,
    ))
}

async fn get_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<NotificationPreferences>> {
    let actor = require_actor(&headers)?;
    state.service.authorize_user_access(actor, user_id).await?;
    Ok(Json(state.service.get_notification_preferences(user_id).await?))
}

async fn set_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
    Json(mut prefs): Json<NotificationPreferences>,
) -> ApiResult<Json<NotificationPreferences>> {
    let actor = require_actor(&headers)?;
    state.service.authorize_user_access(actor, user_id).await?;
    prefs.user_id = user_id;
    Ok(Json(state.service.set_notification_preferences(prefs).await?))
}
