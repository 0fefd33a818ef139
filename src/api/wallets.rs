use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
};
use serde::Deserialize;

use crate::application::WalletMovement;
use crate::domain::{Cents, UserId, Wallet, WalletId, WalletTransaction, money};

use super::{ApiResult, AppState, require_actor};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/:id/wallet", get(wallet_for_user).post(open_wallet))
        .route("/wallets/:id", get(get_wallet))
        .route("/wallets/:id/transactions", get(wallet_transactions))
        .route("/wallets/:id/deposit", post(deposit))
        .route("/wallets/:id/withdraw", post(withdraw))
}

async fn wallet_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<Wallet>> {
    Ok(Json(state.service.wallet_for_user(user_id).await?))
}

async fn open_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<Wallet>> {
    Ok(Json(state.service.get_or_create_wallet(user_id).await?))
}

async fn get_wallet(
    State(state): State<AppState>,
    Path(id): Path<WalletId>,
) -> ApiResult<Json<Wallet>> {
    Ok(Json(state.service.get_wallet(id).await?))
}

#[derive(Debug, Deserialize)]
struct TransactionsQuery {
    limit: Option<usize>,
}

async fn wallet_transactions(
    State(state): State<AppState>,
    Path(id): Path<WalletId>,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Json<Vec<WalletTransaction>>> {
    Ok(Json(state.service.wallet_transactions(id, query.limit).await?))
}

#[derive(Debug, Deserialize)]
struct MovementRequest {
    #[serde(with = "money::decimal")]
    amount: Cents,
    reason: String,
}

async fn deposit(
    State(state): State<AppState>,
    Path(id): Path<WalletId>,
    Json(request): Json<MovementRequest>,
) -> ApiResult<Json<WalletMovement>> {
    Ok(Json(
        state
            .service
            .deposit(id, request.amount, &request.reason)
            .await?,
    ))
}

async fn withdraw(
    State(state): State<AppState>,
    Path(id): Path<WalletId>,
    headers: HeaderMap,
    Json(request): Json<MovementRequest>,
) -> ApiResult<Json<WalletMovement>> {
    let actor = require_actor(&headers)?;
    state.service.authorize_wallet_access(actor, id).await?;
    Ok(Json(
        state
            .service
            .withdraw(id, request.amount, &request.reason)
            .await?,
    ))
}
