//! JSON HTTP surface over [`MarketplaceService`].
//!
//! The acting user arrives in the `X-Actor-Id` header, set by the
//! authentication layer in front of this service.

mod bookings;
mod notifications;
mod payments;
mod reviews;
mod wallets;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::application::{AppError, MarketplaceService};
use crate::config::AppConfig;
use crate::domain::UserId;

pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MarketplaceService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(service: MarketplaceService, config: AppConfig) -> Self {
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(bookings::routes())
        .merge(wallets::routes())
        .merge(payments::routes())
        .merge(reviews::routes())
        .merge(notifications::routes());

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `config.bind` and serve until Ctrl+C.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.bind;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "route not found" })))
}

/// The caller's user id, if the header is present.
pub(crate) fn actor(headers: &HeaderMap) -> Result<Option<UserId>, AppError> {
    let Some(raw) = headers.get(ACTOR_HEADER) else {
        return Ok(None);
    };
    let id = raw
        .to_str()
        .ok()
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or_else(|| AppError::InvalidInput(format!("malformed {} header", ACTOR_HEADER)))?;
    Ok(Some(id))
}

pub(crate) fn require_actor(headers: &HeaderMap) -> Result<UserId, AppError> {
    actor(headers)?.ok_or_else(|| {
        AppError::PermissionDenied(format!("{} header is required", ACTOR_HEADER))
    })
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidStatus(_)
            | AppError::InvalidAmount(_)
            | AppError::InvalidInput(_)
            | AppError::InvalidRating(_)
            | AppError::MissingCancellationReason => StatusCode::BAD_REQUEST,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::BookingNotFound(_)
            | AppError::WalletNotFound(_)
            | AppError::UserNotFound(_)
            | AppError::ProviderNotFound(_)
            | AppError::ServiceNotFound(_)
            | AppError::PaymentNotFound(_)
            | AppError::ReviewNotFound(_)
            | AppError::NotificationNotFound(_) => StatusCode::NOT_FOUND,
            AppError::IllegalTransition { .. }
            | AppError::WalletInactive(_)
            | AppError::ReviewAlreadyExists(_)
            | AppError::ProviderProfileExists(_) => StatusCode::CONFLICT,
            AppError::InsufficientFunds { .. } | AppError::RefundExceedsPayment { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Database(err) => {
                error!(error = ?err, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub(crate) type ApiResult<T> = Result<T, AppError>;
