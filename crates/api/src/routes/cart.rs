//! Cart endpoints. Every route acts on the caller's own cart.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ProductId;
use domain::{CartView, ConvertToOrder, DomainError, RemoveOutcome, UpsertItem};
use serde::Serialize;
use storage::{Cart, CommerceStore, Order};

use crate::AppState;
use crate::error::ApiError;
use crate::identity::Caller;

#[derive(Serialize)]
pub struct ClearResponse {
    pub cleared: bool,
}

/// GET /cart
#[tracing::instrument(skip(state))]
pub async fn get<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
) -> Result<Json<CartView>, ApiError> {
    state
        .carts
        .read(principal)
        .await?
        .map(Json)
        .ok_or_else(|| DomainError::NotFound("cart not found".into()).into())
}

/// PUT /cart/items
#[tracing::instrument(skip(state, cmd))]
pub async fn upsert_item<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
    Json(cmd): Json<UpsertItem>,
) -> Result<Json<Cart>, ApiError> {
    Ok(Json(state.carts.upsert(principal, cmd).await?))
}

/// DELETE /cart/items/{product_id}
///
/// Answers 204 when the last item went and the cart with it.
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
    Path(product_id): Path<ProductId>,
) -> Result<Response, ApiError> {
    match state.carts.remove_item(principal, product_id).await? {
        RemoveOutcome::ItemRemoved(cart) => Ok(Json(cart).into_response()),
        RemoveOutcome::CartCleared => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// DELETE /cart
#[tracing::instrument(skip(state))]
pub async fn clear<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
) -> Result<Json<ClearResponse>, ApiError> {
    let cleared = state.carts.clear(principal).await?;
    Ok(Json(ClearResponse { cleared }))
}

/// POST /cart/checkout
///
/// 201 with the new order, or 200 with the earlier order when the
/// idempotency key was already used.
#[tracing::instrument(skip(state, cmd))]
pub async fn checkout<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
    Json(cmd): Json<ConvertToOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let placement = state.carts.convert_to_order(principal, cmd).await?;

    let status = if placement.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(placement.order)))
}
