//! Token usage from the API Management LLM gateway logs in Log Analytics.

use super::credential::ClientSecretCredential;
use crate::error::ManagerError;
use crate::models::UsageSample;
use crate::services::metric_source::MetricSource;
use crate::services::metrics::record_backend_call;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use service_core::observability::TracedClientExt;

pub struct LogAnalyticsMetricSource {
    client: Client,
    credential: ClientSecretCredential,
    query_url: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    tables: Vec<QueryTable>,
}

#[derive(Debug, Deserialize)]
struct QueryTable {
    columns: Vec<QueryColumn>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct QueryColumn {
    name: String,
}

impl LogAnalyticsMetricSource {
    pub fn new(
        client: Client,
        credential: ClientSecretCredential,
        endpoint: &str,
        workspace_id: &str,
    ) -> Self {
        Self {
            client,
            credential,
            query_url: format!(
                "{}/v1/workspaces/{}/query",
                endpoint.trim_end_matches('/'),
                workspace_id
            ),
        }
    }

    async fn run_query(&self, query: &str) -> Result<QueryResponse, ManagerError> {
        let token = self
            .credential
            .token()
            .await
            .map_err(|e| ManagerError::SourceUnavailable(e.to_string()))?;

        let response = self
            .client
            .traced_post(&self.query_url)
            .bearer_auth(&token)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "query timed out".to_string()
                } else {
                    format!("failed to reach Log Analytics: {}", e)
                };
                ManagerError::SourceUnavailable(reason)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ManagerError::SourceUnavailable(format!(
                "Log Analytics returned {}: {}",
                status, body
            )));
        }

        response.json().await.map_err(|e| {
            ManagerError::SourceUnavailable(format!("invalid query response: {}", e))
        })
    }
}

#[async_trait]
impl MetricSource for LogAnalyticsMetricSource {
    #[tracing::instrument(skip(self))]
    async fn fetch_samples(
        &self,
        subscription_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UsageSample>, ManagerError> {
        if start > end {
            return Ok(Vec::new());
        }

        let query = daily_usage_query(Some(subscription_id), start, end);
        let result = self.run_query(&query).await;
        record_backend_call(self.backend_name(), "fetch_samples", result.is_ok());

        let samples = parse_samples(&result?, &[subscription_id], start, end);
        tracing::debug!(count = samples.len(), "Fetched usage samples");
        Ok(samples)
    }

    /// One query grouped by subscription instead of one per id.
    #[tracing::instrument(skip(self, subscription_ids), fields(subscriptions = subscription_ids.len()))]
    async fn fetch_all_samples(
        &self,
        subscription_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UsageSample>, ManagerError> {
        if start > end || subscription_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = daily_usage_query(None, start, end);
        let result = self.run_query(&query).await;
        record_backend_call(self.backend_name(), "fetch_all_samples", result.is_ok());

        let wanted: Vec<&str> = subscription_ids.iter().map(String::as_str).collect();
        let samples = parse_samples(&result?, &wanted, start, end);
        tracing::debug!(count = samples.len(), "Fetched usage samples");
        Ok(samples)
    }

    fn backend_name(&self) -> &'static str {
        "azure"
    }
}

/// Quote a value as a KQL string literal.
pub fn kql_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Daily token totals per subscription over `start..=end`, restricted to
/// one subscription when `subscription_id` is set.
pub fn daily_usage_query(
    subscription_id: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
) -> String {
    let end_exclusive = end + Duration::days(1);
    let filter = subscription_id
        .map(|id| format!("| where SubscriptionId == {}\n", kql_string(id)))
        .unwrap_or_default();
    format!(
        "let llmHeaderLogs = ApiManagementGatewayLlmLog\n\
         | where DeploymentName != ''\n\
         | where TimeGenerated >= datetime({start}) and TimeGenerated < datetime({end_exclusive});\n\
         llmHeaderLogs\n\
         | join kind=leftouter ApiManagementGatewayLogs on CorrelationId\n\
         | project TimeGenerated, SubscriptionId = ApimSubscriptionId, PromptTokens, CompletionTokens, TotalTokens\n\
         {filter}\
         | summarize SumPromptTokens = sum(PromptTokens), SumCompletionTokens = sum(CompletionTokens), \
         SumTotalTokens = sum(TotalTokens), RequestCount = count() by bin(TimeGenerated, 1d), SubscriptionId\n\
         | order by TimeGenerated asc",
        start = start,
        end_exclusive = end_exclusive,
        filter = filter,
    )
}

fn number(value: Option<&Value>) -> u64 {
    match value {
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        None => 0,
    }
}

/// Rows for the `wanted` subscriptions within `start..=end`. Without a
/// `SubscriptionId` column, rows belong to the single wanted id.
fn parse_samples(
    response: &QueryResponse,
    wanted: &[&str],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<UsageSample> {
    let Some(table) = response.tables.first() else {
        return Vec::new();
    };
    let column = |name: &str| table.columns.iter().position(|c| c.name == name);

    let (Some(time_col), Some(total_col)) = (column("TimeGenerated"), column("SumTotalTokens"))
    else {
        tracing::warn!("Usage query result is missing expected columns");
        return Vec::new();
    };
    let sub_col = column("SubscriptionId");
    let prompt_col = column("SumPromptTokens");
    let completion_col = column("SumCompletionTokens");
    let requests_col = column("RequestCount");

    table
        .rows
        .iter()
        .filter_map(|row| {
            let date = row
                .get(time_col)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.date_naive())?;
            if date < start || date > end {
                return None;
            }
            let subscription_id = match sub_col {
                Some(col) => row.get(col).and_then(Value::as_str)?,
                None if wanted.len() == 1 => wanted[0],
                None => return None,
            };
            if !wanted.contains(&subscription_id) {
                return None;
            }

            Some(UsageSample {
                subscription_id: subscription_id.to_string(),
                date,
                tokens: number(row.get(total_col)),
                prompt_tokens: prompt_col.map_or(0, |c| number(row.get(c))),
                completion_tokens: completion_col.map_or(0, |c| number(row.get(c))),
                requests: requests_col.map_or(0, |c| number(row.get(c))),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, d).unwrap()
    }

    fn response(rows: Value) -> QueryResponse {
        serde_json::from_value(json!({
            "tables": [{
                "name": "PrimaryResult",
                "columns": [
                    {"name": "TimeGenerated", "type": "datetime"},
                    {"name": "SubscriptionId", "type": "string"},
                    {"name": "SumPromptTokens", "type": "long"},
                    {"name": "SumCompletionTokens", "type": "long"},
                    {"name": "SumTotalTokens", "type": "long"},
                    {"name": "RequestCount", "type": "long"}
                ],
                "rows": rows
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_kql_string_escapes_quotes() {
        assert_eq!(kql_string("sub-1"), "'sub-1'");
        assert_eq!(kql_string("a'b"), "'a\\'b'");
        assert_eq!(kql_string("a\\'"), "'a\\\\\\''");
    }

    #[test]
    fn test_query_embeds_escaped_id_and_range() {
        let query = daily_usage_query(Some("x' or 1==1 //"), day(1), day(3));
        assert!(query.contains("SubscriptionId == 'x\\' or 1==1 //'"));
        assert!(query.contains("datetime(2025-07-01)"));
        assert!(query.contains("datetime(2025-07-04)"));
    }

    #[test]
    fn test_query_without_id_groups_every_subscription() {
        let query = daily_usage_query(None, day(1), day(3));
        assert!(!query.contains("where SubscriptionId"));
        assert!(query.contains("by bin(TimeGenerated, 1d), SubscriptionId"));
    }

    #[test]
    fn test_parse_rows() {
        let response = response(json!([
            ["2025-07-01T00:00:00Z", "sub-1", 40, 60, 100, 3],
            ["2025-07-02T00:00:00Z", "sub-1", 10, 20, 30.0, 1],
            ["2025-07-02T00:00:00Z", "sub-2", 1, 1, 2, 1],
            ["2025-06-30T00:00:00Z", "sub-1", 1, 1, 2, 1],
            ["not a date", "sub-1", 1, 1, 2, 1]
        ]));

        let samples = parse_samples(&response, &["sub-1"], day(1), day(2));

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].date, day(1));
        assert_eq!(samples[0].tokens, 100);
        assert_eq!(samples[0].prompt_tokens, 40);
        assert_eq!(samples[0].requests, 3);
        assert_eq!(samples[1].tokens, 30);
    }

    #[test]
    fn test_parse_without_tables_is_empty() {
        let response: QueryResponse = serde_json::from_value(json!({"tables": []})).unwrap();
        assert!(parse_samples(&response, &["sub-1"], day(1), day(2)).is_empty());
    }

    async fn source_for(server: &MockServer) -> LogAnalyticsMetricSource {
        source_with_client(server, Client::new()).await
    }

    async fn source_with_client(server: &MockServer, client: Client) -> LogAnalyticsMetricSource {
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token-1",
                "expires_in": 3600
            })))
            .mount(server)
            .await;

        let credential = ClientSecretCredential::new(
            client.clone(),
            &server.uri(),
            "tenant",
            "client",
            Secret::new("secret".to_string()),
            "https://api.loganalytics.io/.default",
        );
        LogAnalyticsMetricSource::new(client, credential, &server.uri(), "ws-1")
    }

    #[tokio::test]
    async fn test_fetch_samples_queries_workspace() {
        let server = MockServer::start().await;
        let source = source_for(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/workspaces/ws-1/query"))
            .and(header("authorization", "Bearer token-1"))
            .and(body_string_contains("ApiManagementGatewayLlmLog"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tables": [{
                    "columns": [
                        {"name": "TimeGenerated"},
                        {"name": "SubscriptionId"},
                        {"name": "SumTotalTokens"},
                        {"name": "RequestCount"}
                    ],
                    "rows": [["2025-07-01T00:00:00Z", "sub-1", 500, 4]]
                }]
            })))
            .mount(&server)
            .await;

        let samples = source.fetch_samples("sub-1", day(1), day(1)).await.unwrap();

        assert_eq!(samples, vec![UsageSample {
            subscription_id: "sub-1".into(),
            date: day(1),
            tokens: 500,
            prompt_tokens: 0,
            completion_tokens: 0,
            requests: 4,
        }]);
    }

    #[tokio::test]
    async fn test_server_error_is_source_unavailable() {
        let server = MockServer::start().await;
        let source = source_for(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/workspaces/ws-1/query"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = source.fetch_samples("sub-1", day(1), day(2)).await;
        assert!(matches!(result, Err(ManagerError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_fetch_all_runs_a_single_query() {
        let server = MockServer::start().await;
        let source = source_for(&server).await;
        Mock::given(method("POST"))
            .and(path("/v1/workspaces/ws-1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tables": [{
                    "columns": [
                        {"name": "TimeGenerated"},
                        {"name": "SubscriptionId"},
                        {"name": "SumTotalTokens"}
                    ],
                    "rows": [
                        ["2025-07-01T00:00:00Z", "sub-1", 500],
                        ["2025-07-01T00:00:00Z", "sub-2", 70],
                        ["2025-07-02T00:00:00Z", "sub-9", 10]
                    ]
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ids = vec!["sub-1".to_string(), "sub-2".to_string()];
        let samples = source.fetch_all_samples(&ids, day(1), day(2)).await.unwrap();

        let found: Vec<(&str, u64)> = samples
            .iter()
            .map(|s| (s.subscription_id.as_str(), s.tokens))
            .collect();
        assert_eq!(found, vec![("sub-1", 500), ("sub-2", 70)]);
    }

    #[tokio::test]
    async fn test_slow_workspace_times_out() {
        let server = MockServer::start().await;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(1))
            .build()
            .unwrap();
        let source = source_with_client(&server, client).await;
        Mock::given(method("POST"))
            .and(path("/v1/workspaces/ws-1/query"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"tables": []}))
                    .set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let result = source.fetch_samples("sub-1", day(1), day(2)).await;
        assert!(
            matches!(&result, Err(ManagerError::SourceUnavailable(reason)) if reason.contains("timed out")),
            "unexpected result: {:?}",
            result
        );
    }
}
