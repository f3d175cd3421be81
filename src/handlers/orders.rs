//! Read-only admin API over orders, ledger totals, and payment proofs.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::models::order::{LedgerState, Order, PaymentProof};
use crate::AppState;

/// An order with its derived payment totals.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderSummary {
    #[serde(flatten)]
    pub order: Order,
    pub payment: LedgerState,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub payment: LedgerState,
    pub proofs: Vec<PaymentProof>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderSummary>,
    pub total: usize,
}

/// Lists all orders, newest first, with derived payment status.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    tag = "orders",
    responses(
        (status = 200, description = "All orders", body = OrderListResponse)
    )
)]
#[instrument(skip(state))]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    let mut orders = state.orders.list_orders().await?;
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut summaries = Vec::with_capacity(orders.len());
    for order in orders {
        let payment = state.ledger.state_for(&order).await?;
        summaries.push(OrderSummary { order, payment });
    }

    let total = summaries.len();
    Ok(Json(OrderListResponse {
        orders: summaries,
        total,
    }))
}

/// Fetches one order by its code, with ledger totals and attached proofs.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_id}",
    tag = "orders",
    params(
        ("order_id" = String, Path, description = "Order code, e.g. DK-1004")
    ),
    responses(
        (status = 200, description = "Order detail", body = OrderDetail),
        (status = 404, description = "Unknown order code")
    )
)]
#[instrument(skip(state))]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderDetail>, ServiceError> {
    let order_id = order_id.trim().to_uppercase();
    let order = state
        .orders
        .get_order(&order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
    let payment = state.ledger.state_for(&order).await?;
    let proofs = state.orders.list_proofs(&order_id).await?;

    Ok(Json(OrderDetail {
        order,
        payment,
        proofs,
    }))
}
