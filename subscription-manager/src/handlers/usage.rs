use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::models::{
    ChartData, DailyUsage, SubscriptionUsage, TopConsumer, TopConsumersQuery, UsageOverview,
    UsageQuery, UsageStats,
};
use crate::startup::AppState;

#[tracing::instrument(skip(state))]
pub async fn overview(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageOverview>, AppError> {
    query.validate()?;
    Ok(Json(state.usage.overview(query.days).await?))
}

#[tracing::instrument(skip(state))]
pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageStats>, AppError> {
    query.validate()?;
    Ok(Json(state.usage.stats(query.days).await?))
}

#[tracing::instrument(skip(state))]
pub async fn top_consumers(
    State(state): State<AppState>,
    Query(query): Query<TopConsumersQuery>,
) -> Result<Json<Vec<TopConsumer>>, AppError> {
    query.validate()?;
    Ok(Json(state.usage.top_consumers(query.days, query.limit).await?))
}

pub async fn overall_chart(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<ChartData>, AppError> {
    query.validate()?;
    Ok(Json(state.usage.chart(None, query.days).await?))
}

#[tracing::instrument(skip(state))]
pub async fn subscription_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<SubscriptionUsage>, AppError> {
    query.validate()?;
    Ok(Json(state.usage.subscription_usage(&id, query.days).await?))
}

/// Days without samples are omitted; charts are the zero-filled view.
#[tracing::instrument(skip(state))]
pub async fn daily_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Vec<DailyUsage>>, AppError> {
    query.validate()?;
    Ok(Json(state.usage.daily(&id, query.days).await?))
}

pub async fn subscription_chart(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<ChartData>, AppError> {
    query.validate()?;
    Ok(Json(state.usage.chart(Some(&id), query.days).await?))
}
