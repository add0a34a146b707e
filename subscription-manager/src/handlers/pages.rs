use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use validator::Validate;

use super::partials::HtmlError;
use super::views::{DashboardTemplate, SubscriptionPageTemplate, SubscriptionsPageTemplate};
use crate::models::UsageQuery;
use crate::startup::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionsPageQuery {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub enabled: String,
}

pub async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<impl IntoResponse, HtmlError> {
    query.validate()?;
    Ok(DashboardTemplate {
        days: query
            .days
            .unwrap_or(state.settings.usage.default_window_days),
        backend: state.backend_label(),
    })
}

pub async fn subscriptions(Query(query): Query<SubscriptionsPageQuery>) -> impl IntoResponse {
    SubscriptionsPageTemplate {
        search: query.search,
        enabled: query.enabled,
    }
}

pub async fn subscription_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Result<impl IntoResponse, HtmlError> {
    query.validate()?;
    let subscription = state.store.get(&id).await?;
    Ok(SubscriptionPageTemplate {
        subscription,
        days: query
            .days
            .unwrap_or(state.settings.usage.default_window_days),
    })
}
