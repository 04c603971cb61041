//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::NewOrder;
use serde::Deserialize;
use storage::{CommerceStore, CourierProcedure, Order, OrderStatus};

use crate::AppState;
use crate::error::ApiError;
use crate::identity::Caller;

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct TrackingRequest {
    pub procedure: CourierProcedure,
}

/// POST /orders: place an order directly, without a cart.
#[tracing::instrument(skip(state, cmd))]
pub async fn create<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
    Json(cmd): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let placement = state.orders.create(principal, cmd).await?;

    let status = if placement.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(placement.order)))
}

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.orders.list_mine(principal).await?))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orders.get(principal, id).await?))
}

/// POST /orders/{id}/status
#[tracing::instrument(skip(state))]
pub async fn update_status<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
    Path(id): Path<OrderId>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let change = state.orders.update_status(principal, id, req.status).await?;
    Ok(Json(change.order))
}

/// POST /orders/{id}/tracking
#[tracing::instrument(skip(state))]
pub async fn append_tracking<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(principal): Caller,
    Path(id): Path<OrderId>,
    Json(req): Json<TrackingRequest>,
) -> Result<Json<Order>, ApiError> {
    let change = state
        .orders
        .append_courier_tracking(principal, id, req.procedure)
        .await?;
    Ok(Json(change.order))
}
