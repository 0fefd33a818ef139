use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::Deserialize;

use crate::application::{AppError, RefundResult, WalletPayment};
use crate::domain::{
    BookingId, Cents, NewPayment, Payment, PaymentId, PaymentRefund, PaymentStatus, money,
};

use super::{ApiResult, AppState, actor};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/:id", get(get_payment))
        .route("/payments/:id/status", post(update_status))
        .route("/payments/:id/refunds", post(refund_payment).get(list_refunds))
        .route("/bookings/:id/pay-from-wallet", post(pay_from_wallet))
}

async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<NewPayment>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let payment = state.service.create_payment(request).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
) -> ApiResult<Json<Payment>> {
    Ok(Json(state.service.get_payment(id).await?))
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: String,
    #[serde(default)]
    gateway_payment_id: Option<String>,
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Json<Payment>> {
    let status = PaymentStatus::from_str(&request.status).ok_or_else(|| {
        AppError::InvalidInput(format!("unknown payment status: {}", request.status))
    })?;
    let payment = state
        .service
        .update_payment_status(id, status, request.gateway_payment_id.as_deref())
        .await?;
    Ok(Json(payment))
}

#[derive(Debug, Deserialize)]
struct RefundRequest {
    #[serde(with = "money::decimal")]
    amount: Cents,
    reason: String,
    #[serde(default)]
    to_wallet: bool,
}

async fn refund_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<PaymentId>,
    Json(request): Json<RefundRequest>,
) -> ApiResult<Json<RefundResult>> {
    let processed_by = actor(&headers)?;
    let result = state
        .service
        .refund_payment(id, request.amount, &request.reason, processed_by, request.to_wallet)
        .await?;
    Ok(Json(result))
}

async fn list_refunds(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
) -> ApiResult<Json<Vec<PaymentRefund>>> {
    Ok(Json(state.service.list_refunds(id).await?))
}

#[derive(Debug, Deserialize)]
struct WalletPaymentRequest {
    #[serde(with = "money::decimal")]
    amount: Cents,
    #[serde(default)]
    description: Option<String>,
}

async fn pay_from_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(booking_id): Path<BookingId>,
    Json(request): Json<WalletPaymentRequest>,
) -> ApiResult<Json<WalletPayment>> {
    if let Some(actor) = actor(&headers)? {
        let booking = state.service.get_booking(booking_id).await?;
        if booking.customer_id != actor {
            return Err(AppError::PermissionDenied(format!(
                "only the customer of {} can pay it from their wallet",
                booking.booking_number
            )));
        }
    }
    let payment = state
        .service
        .pay_booking_from_wallet(booking_id, request.amount, request.description)
        .await?;
    Ok(Json(payment))
}
