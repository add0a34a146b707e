//! htmx fragments for the dashboard. Failures render the error fragment with
//! the same status code the JSON API would use.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use service_core::error::AppError;
use validator::{Validate, ValidationErrors};

use super::views::{
    ChartTemplate, DailyUsageTemplate, ErrorTemplate, RecentSubscriptionsTemplate,
    StatsTemplate, SubscriptionDetailTemplate, SubscriptionRowTemplate,
    SubscriptionTableTemplate, TopConsumersTemplate,
};
use crate::error::ManagerError;
use crate::models::{Subscription, SubscriptionFilter, TopConsumersQuery, UsageQuery};
use crate::startup::AppState;

const RECENT_SUBSCRIPTIONS: usize = 5;

/// Error rendered as an HTML fragment instead of JSON.
#[derive(Debug)]
pub struct HtmlError(pub AppError);

impl From<AppError> for HtmlError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<ManagerError> for HtmlError {
    fn from(err: ManagerError) -> Self {
        Self(err.into())
    }
}

impl From<ValidationErrors> for HtmlError {
    fn from(err: ValidationErrors) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for HtmlError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "Fragment request failed");
        }

        let template = ErrorTemplate {
            status: status.as_u16(),
            message: self.0.public_message(),
        };
        (status, template).into_response()
    }
}

/// Table filters as sent by the HTML form; an empty `enabled` means any state.
#[derive(Debug, Default, Deserialize)]
pub struct TableQuery {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub enabled: String,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl TableQuery {
    fn to_filter(&self) -> Result<SubscriptionFilter, HtmlError> {
        let enabled = match self.enabled.trim() {
            "" => None,
            "true" => Some(true),
            "false" => Some(false),
            other => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "enabled must be true or false, got '{}'",
                    other
                ))
                .into())
            }
        };

        let defaults = SubscriptionFilter::default();
        let filter = SubscriptionFilter {
            search: Some(self.search.clone()).filter(|s| !s.trim().is_empty()),
            enabled,
            page: self.page.unwrap_or(defaults.page),
            page_size: self.page_size.unwrap_or(defaults.page_size),
        };
        filter.validate()?;
        Ok(filter)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChartQuery {
    pub subscription_id: Option<String>,
    #[validate(range(min = 1, max = 365, message = "days must be between 1 and 365"))]
    pub days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ToggleView {
    pub view: Option<String>,
}

/// Limit form: an empty field clears the limit.
#[derive(Debug, Default, Deserialize)]
pub struct LimitForm {
    #[serde(default)]
    pub limit: String,
}

impl LimitForm {
    fn parse(&self) -> Result<Option<i64>, HtmlError> {
        let raw = self.limit.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<i64>().map(Some).map_err(|_| {
            AppError::BadRequest(anyhow::anyhow!(
                "limit must be a whole number or empty, got '{}'",
                raw
            ))
            .into()
        })
    }
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<StatsTemplate, HtmlError> {
    query.validate()?;
    Ok(StatsTemplate {
        stats: state.usage.stats(query.days).await?,
    })
}

pub async fn top_consumers(
    State(state): State<AppState>,
    Query(query): Query<TopConsumersQuery>,
) -> Result<TopConsumersTemplate, HtmlError> {
    query.validate()?;
    Ok(TopConsumersTemplate {
        consumers: state.usage.top_consumers(query.days, query.limit).await?,
    })
}

pub async fn chart(
    State(state): State<AppState>,
    Query(query): Query<ChartQuery>,
) -> Result<ChartTemplate, HtmlError> {
    query.validate()?;
    let subscription_id = query.subscription_id.as_deref().filter(|id| !id.is_empty());
    let chart = state.usage.chart(subscription_id, query.days).await?;
    let chart_json = serde_json::to_string(&chart).map_err(|e| AppError::InternalError(e.into()))?;

    Ok(ChartTemplate {
        canvas_id: if subscription_id.is_some() {
            "subscription-chart".to_string()
        } else {
            "usage-chart".to_string()
        },
        chart_json,
    })
}

#[tracing::instrument(skip(state))]
pub async fn subscription_table(
    State(state): State<AppState>,
    Query(query): Query<TableQuery>,
) -> Result<SubscriptionTableTemplate, HtmlError> {
    let filter = query.to_filter()?;
    let subscriptions = state.store.list().await?;

    Ok(SubscriptionTableTemplate {
        page: filter.apply(subscriptions),
        search: query.search,
        enabled: query.enabled,
    })
}

/// Most recently created subscriptions first.
pub async fn recent_subscriptions(
    State(state): State<AppState>,
) -> Result<RecentSubscriptionsTemplate, HtmlError> {
    let mut subscriptions = state.store.list().await?;
    subscriptions.sort_by(|a, b| b.created_date.cmp(&a.created_date).then_with(|| a.id.cmp(&b.id)));
    subscriptions.truncate(RECENT_SUBSCRIPTIONS);

    Ok(RecentSubscriptionsTemplate { subscriptions })
}

async fn detail_card(
    state: &AppState,
    subscription: Subscription,
    days: Option<u32>,
) -> Result<SubscriptionDetailTemplate, HtmlError> {
    let usage = state.usage.subscription_usage(&subscription.id, days).await?;
    let threshold_percent = (state.usage.policy().near_limit_threshold() * 100.0).round() as u32;

    Ok(SubscriptionDetailTemplate {
        subscription,
        usage,
        threshold_percent,
    })
}

#[tracing::instrument(skip(state))]
pub async fn subscription_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Result<SubscriptionDetailTemplate, HtmlError> {
    query.validate()?;
    let subscription = state.store.get(&id).await?;
    detail_card(&state, subscription, query.days).await
}

#[tracing::instrument(skip(state))]
pub async fn toggle_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(view): Query<ToggleView>,
) -> Result<Response, HtmlError> {
    let subscription = state.store.toggle(&id).await?;
    tracing::info!(subscription_id = %id, enabled = subscription.enabled, "Subscription toggled");

    if view.view.as_deref() == Some("detail") {
        return Ok(detail_card(&state, subscription, None).await?.into_response());
    }
    Ok(SubscriptionRowTemplate { subscription }.into_response())
}

#[tracing::instrument(skip(state, form))]
pub async fn set_limit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<LimitForm>,
) -> Result<SubscriptionDetailTemplate, HtmlError> {
    let limit = form.parse()?;
    let subscription = state.store.set_limit(&id, limit).await?;
    tracing::info!(subscription_id = %id, token_limit = ?subscription.token_limit, "Token limit set");

    detail_card(&state, subscription, None).await
}

pub async fn daily_usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Result<DailyUsageTemplate, HtmlError> {
    query.validate()?;
    Ok(DailyUsageTemplate {
        daily: state.usage.daily(&id, query.days).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_empty_limit_clears() {
        let form = LimitForm {
            limit: "  ".into(),
        };
        assert_eq!(form.parse().unwrap(), None);
    }

    #[test]
    fn test_limit_form_parses_numbers() {
        let form = LimitForm {
            limit: "1000".into(),
        };
        assert_eq!(form.parse().unwrap(), Some(1000));

        let form = LimitForm {
            limit: "lots".into(),
        };
        let err = form.parse().unwrap_err();
        assert_eq!(err.0.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_table_query_maps_enabled() {
        let query = TableQuery {
            enabled: "false".into(),
            ..Default::default()
        };
        assert_eq!(query.to_filter().unwrap().enabled, Some(false));

        let query = TableQuery::default();
        let filter = query.to_filter().unwrap();
        assert_eq!(filter.enabled, None);
        assert_eq!(filter.search, None);
        assert_eq!(filter.page_size, 50);

        let query = TableQuery {
            enabled: "maybe".into(),
            ..Default::default()
        };
        assert!(query.to_filter().is_err());
    }

    #[test]
    fn test_table_query_rejects_oversized_page() {
        let query = TableQuery {
            page_size: Some(101),
            ..Default::default()
        };
        let err = query.to_filter().unwrap_err();
        assert_eq!(err.0.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_html_error_keeps_status() {
        let response = HtmlError::from(ManagerError::NotFound("sub-9".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
