use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::models::{LimitUpdate, Subscription, SubscriptionFilter};
use crate::startup::AppState;

/// Number of subscriptions matching the filters, before pagination.
pub const TOTAL_COUNT_HEADER: &str = "x-total-count";

#[tracing::instrument(skip(state))]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(filter): Query<SubscriptionFilter>,
) -> Result<([(&'static str, String); 1], Json<Vec<Subscription>>), AppError> {
    filter.validate()?;

    let subscriptions = state.store.list().await?;
    let page = filter.apply(subscriptions);
    Ok((
        [(TOTAL_COUNT_HEADER, page.total_count.to_string())],
        Json(page.subscriptions),
    ))
}

#[tracing::instrument(skip(state))]
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    Ok(Json(state.store.get(&id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn toggle_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state.store.toggle(&id).await?;

    tracing::info!(
        subscription_id = %id,
        enabled = subscription.enabled,
        "Subscription toggled"
    );

    Ok(Json(subscription))
}

#[tracing::instrument(skip(state, request))]
pub async fn set_limit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Result<Json<LimitUpdate>, JsonRejection>,
) -> Result<Json<Subscription>, AppError> {
    let Json(request) = request.map_err(|rejection| {
        AppError::BadRequest(anyhow::anyhow!(
            "limit must be null or a non-negative integer: {}",
            rejection.body_text()
        ))
    })?;
    let subscription = state.store.set_limit(&id, request.limit).await?;

    tracing::info!(
        subscription_id = %id,
        token_limit = ?subscription.token_limit,
        "Token limit set"
    );

    Ok(Json(subscription))
}
