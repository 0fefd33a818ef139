use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::application::AppError;
use crate::domain::{NewReview, Provider, ProviderId, Review, ReviewId};

use super::{ApiResult, AppState, actor, require_actor};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/providers/:id", get(get_provider))
        .route("/providers/:id/reviews", get(list_reviews))
        .route("/reviews", post(submit_review))
        .route("/reviews/:id", get(get_review))
        .route("/reviews/:id/response", post(respond_to_review))
}

#[derive(Debug, Serialize)]
struct ProviderResponse {
    #[serde(flatten)]
    provider: Provider,
    average_rating: f64,
}

async fn get_provider(
    State(state): State<AppState>,
    Path(id): Path<ProviderId>,
) -> ApiResult<Json<ProviderResponse>> {
    let provider = state.service.get_provider(id).await?;
    let average_rating = provider.rating.average();
    Ok(Json(ProviderResponse {
        provider,
        average_rating,
    }))
}

async fn list_reviews(
    State(state): State<AppState>,
    Path(id): Path<ProviderId>,
) -> ApiResult<Json<Vec<Review>>> {
    Ok(Json(state.service.list_reviews(id).await?))
}

async fn submit_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NewReview>,
) -> ApiResult<(StatusCode, Json<Review>)> {
    if let Some(actor) = actor(&headers)? {
        if actor != request.customer_id {
            return Err(AppError::PermissionDenied(
                "reviews can only be submitted by the booking's customer".to_string(),
            ));
        }
    }
    let review = state.service.submit_review(request).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<ReviewId>,
) -> ApiResult<Json<Review>> {
    Ok(Json(state.service.get_review(id).await?))
}

#[derive(Debug, Deserialize)]
struct ResponseRequest {
    response: String,
}

async fn respond_to_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ReviewId>,
    Json(request): Json<ResponseRequest>,
) -> ApiResult<Json<Review>> {
    let actor = require_actor(&headers)?;
    Ok(Json(
        state
            .service
            .respond_to_review(id, actor, request.response)
            .await?,
    ))
}
