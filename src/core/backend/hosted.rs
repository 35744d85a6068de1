use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use super::realtime;
use super::{Backend, BackendError, ChangeFeed, Filter, Query, Row};

// ── PostgREST query encoding ──

fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// `column=op.value` pairs. Null equality uses `is.null`.
pub(crate) fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| {
            let rhs = match (&f.value, f.op.as_str()) {
                (Value::Null, "eq") => "is.null".to_string(),
                (value, op) => format!("{}.{}", op, encode_value(value)),
            };
            (f.column.clone(), rhs)
        })
        .collect()
}

pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(filter_params(&query.filters));
    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), order));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

// ── Hosted backend ──

/// Supabase PostgREST + Realtime backend.
pub struct HostedBackend {
    base_url: String,
    api_key: String,
    client: Client,
}

impl HostedBackend {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: Client::new(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn rows(res: Response) -> Result<Vec<Row>, BackendError> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(BackendError::Http {
                status: status.as_u16(),
                message,
            });
        }
        let body = res.text().await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl Backend for HostedBackend {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError> {
        let res = self
            .authed(self.client.get(self.table_url(table)))
            .query(&query_params(query))
            .send()
            .await?;
        Self::rows(res).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
        let res = self
            .authed(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await?;
        Self::rows(res).await
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, BackendError> {
        let res = self
            .authed(self.client.patch(self.table_url(table)))
            .query(&filter_params(filters))
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        Self::rows(res).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError> {
        let res = self
            .authed(self.client.delete(self.table_url(table)))
            .query(&filter_params(filters))
            .header("Prefer", "return=representation")
            .send()
            .await?;
        Self::rows(res).await
    }

    async fn upsert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, BackendError> {
        let res = self
            .authed(self.client.post(self.table_url(table)))
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&rows)
            .send()
            .await?;
        Self::rows(res).await
    }

    async fn subscribe(&self, table: &str) -> Result<ChangeFeed, BackendError> {
        realtime::subscribe(&self.base_url, &self.api_key, table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::FilterOp;

    #[test]
    fn filters_encode_as_postgrest_operators() {
        let params = filter_params(&[
            Filter::eq("current_status", "編集中"),
            Filter::new("season", FilterOp::Gte, 1),
            Filter::eq("director", Value::Null),
            Filter::lte("due_date", "2024-04-30"),
        ]);
        assert_eq!(
            params,
            vec![
                ("current_status".to_string(), "eq.編集中".to_string()),
                ("season".to_string(), "gte.1".to_string()),
                ("director".to_string(), "is.null".to_string()),
                ("due_date".to_string(), "lte.2024-04-30".to_string()),
            ]
        );
    }

    #[test]
    fn query_adds_select_order_and_limit() {
        let query = Query::new()
            .eq("is_active", true)
            .order_by("sort_order", true)
            .order_by("created_at", false)
            .limit(5);
        let params = query_params(&query);
        assert_eq!(params[0], ("select".to_string(), "*".to_string()));
        assert!(params.contains(&("is_active".to_string(), "eq.true".to_string())));
        assert!(params.contains(&(
            "order".to_string(),
            "sort_order.asc,created_at.desc".to_string()
        )));
        assert!(params.contains(&("limit".to_string(), "5".to_string())));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend = HostedBackend::new("https://abc.supabase.co/", "key");
        assert_eq!(backend.table_url("programs"), "https://abc.supabase.co/rest/v1/programs");
    }
}
