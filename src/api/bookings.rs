use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::{AppError, PricingUpdate};
use crate::domain::{
    Booking, BookingId, BookingStatus, BookingStatusHistory, BookingView, Cents, NewBooking, Payment,
    ProviderId, Schedule, UserId, money,
};
use crate::storage::{BookingFilter, BookingScope, BookingStats};

use super::{ApiResult, AppState, actor, require_actor};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/upcoming", get(upcoming_bookings))
        .route("/bookings/stats", get(booking_stats))
        .route("/bookings/number/:number", get(get_booking_by_number))
        .route("/bookings/:id", get(get_booking).delete(deactivate_booking))
        .route("/bookings/:id/status", post(transition_booking))
        .route("/bookings/:id/reschedule", post(reschedule_booking))
        .route("/bookings/:id/pricing", put(update_pricing))
        .route("/bookings/:id/history", get(booking_history))
        .route("/bookings/:id/payments", get(booking_payments))
}

fn view(booking: Booking) -> BookingView {
    BookingView::new(booking, Utc::now().naive_utc())
}

async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NewBooking>,
) -> ApiResult<(StatusCode, Json<BookingView>)> {
    if let Some(actor) = actor(&headers)? {
        if actor != request.customer_id {
            return Err(AppError::PermissionDenied(
                "bookings can only be created for yourself".to_string(),
            ));
        }
    }
    let booking = state.service.create_booking(request).await?;
    Ok((StatusCode::CREATED, Json(view(booking))))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    customer: Option<UserId>,
    provider: Option<ProviderId>,
    status: Option<String>,
    #[serde(default)]
    include_inactive: bool,
    limit: Option<usize>,
}

async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<BookingView>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| BookingStatus::from_str(s).ok_or_else(|| AppError::InvalidStatus(s.to_string())))
        .transpose()?;
    let filter = BookingFilter {
        customer: query.customer,
        provider: query.provider,
        status,
        include_inactive: query.include_inactive,
        limit: query.limit,
    };
    let bookings = state.service.list_bookings(&filter).await?;
    Ok(Json(bookings.into_iter().map(view).collect()))
}

#[derive(Debug, Default, Deserialize)]
struct ScopeQuery {
    customer: Option<UserId>,
    provider: Option<ProviderId>,
    from: Option<NaiveDate>,
}

impl ScopeQuery {
    fn scope(&self) -> ApiResult<BookingScope> {
        match (self.customer, self.provider) {
            (Some(_), Some(_)) => Err(AppError::InvalidInput(
                "filter by customer or provider, not both".to_string(),
            )),
            (Some(id), None) => Ok(BookingScope::Customer(id)),
            (None, Some(id)) => Ok(BookingScope::Provider(id)),
            (None, None) => Ok(BookingScope::All),
        }
    }
}

async fn upcoming_bookings(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<Json<Vec<BookingView>>> {
    let today = query.from.unwrap_or_else(|| Utc::now().date_naive());
    let bookings = state.service.upcoming_bookings(query.scope()?, today).await?;
    Ok(Json(bookings.into_iter().map(view).collect()))
}

async fn booking_stats(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<Json<BookingStats>> {
    Ok(Json(state.service.booking_stats(query.scope()?).await?))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
) -> ApiResult<Json<BookingView>> {
    Ok(Json(state.service.get_booking_view(id).await?))
}

async fn get_booking_by_number(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let booking = state.service.get_booking_by_number(&number).await?;
    Ok(Json(view(booking)))
}

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    status: String,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Serialize)]
struct TransitionResponse {
    booking: BookingView,
    previous_status: BookingStatus,
}

async fn transition_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<BookingId>,
    Json(request): Json<TransitionRequest>,
) -> ApiResult<Json<TransitionResponse>> {
    let actor = require_actor(&headers)?;
    if BookingStatus::from_str(&request.status).is_none() {
        return Err(AppError::InvalidStatus(request.status));
    }
    state
        .service
        .authorize_transition(actor, id, &request.status)
        .await?;
    let result = state
        .service
        .transition_booking(id, &request.status, Some(actor), request.note.as_deref())
        .await?;
    Ok(Json(TransitionResponse {
        booking: view(result.booking),
        previous_status: result.previous_status,
    }))
}

#[derive(Debug, Deserialize)]
struct RescheduleRequest {
    date: NaiveDate,
    time: NaiveTime,
    duration_minutes: u32,
    #[serde(default)]
    note: Option<String>,
}

async fn reschedule_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<BookingId>,
    Json(request): Json<RescheduleRequest>,
) -> ApiResult<Json<TransitionResponse>> {
    let actor = require_actor(&headers)?;
    state
        .service
        .authorize_transition(actor, id, BookingStatus::Rescheduled.as_str())
        .await?;
    let schedule = Schedule::new(request.date, request.time, request.duration_minutes);
    let result = state
        .service
        .reschedule_booking(id, schedule, Some(actor), request.note.as_deref())
        .await?;
    Ok(Json(TransitionResponse {
        booking: view(result.booking),
        previous_status: result.previous_status,
    }))
}

#[derive(Debug, Deserialize)]
struct PricingRequest {
    #[serde(default, with = "money::decimal_opt")]
    final_price: Option<Cents>,
    #[serde(default, with = "money::decimal")]
    additional_charges: Cents,
    #[serde(default, with = "money::decimal")]
    discount_amount: Cents,
}

async fn update_pricing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<BookingId>,
    Json(request): Json<PricingRequest>,
) -> ApiResult<Json<BookingView>> {
    let actor = require_actor(&headers)?;
    state
        .service
        .authorize_booking_management(actor, id)
        .await?;
    let update = PricingUpdate {
        final_price: request.final_price,
        additional_charges: request.additional_charges,
        discount_amount: request.discount_amount,
    };
    let booking = state.service.update_pricing(id, update).await?;
    Ok(Json(view(booking)))
}

async fn deactivate_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<BookingId>,
) -> ApiResult<StatusCode> {
    let actor = require_actor(&headers)?;
    if !state.service.get_user(actor).await?.is_admin() {
        return Err(AppError::PermissionDenied(
            "only admins can delete bookings".to_string(),
        ));
    }
    state.service.deactivate_booking(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn booking_history(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
) -> ApiResult<Json<Vec<BookingStatusHistory>>> {
    Ok(Json(state.service.booking_history(id).await?))
}

async fn booking_payments(
    State(state): State<AppState>,
    Path(id): Path<BookingId>,
) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(state.service.list_payments_for_booking(id).await?))
}
