use crate::config::UpstreamSettings;
use crate::error::QueryError;
use crate::leads::LeadWriter;
use crate::models::{
    Lead, LeadInput, LeadStats, PageResult, Pagination, ResourceData, WebhookEvent, WebhookStats,
};
use crate::query::{Fetcher, QueryKey, Resource};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// `{ data }` body of every upstream response
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// `{ data, pagination }` body of paginated listings
#[derive(Debug, Deserialize)]
struct PagedEnvelope<T> {
    data: Vec<T>,
    pagination: Pagination,
}

impl<T> From<PagedEnvelope<T>> for PageResult<T> {
    fn from(envelope: PagedEnvelope<T>) -> Self {
        PageResult {
            items: envelope.data,
            pagination: envelope.pagination,
        }
    }
}

#[derive(Debug)]
pub struct ApiClientBuilder {
    base_url: String,
    timeout: Duration,
    api_token: Option<String>,
}

impl ApiClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            api_token: None,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn build(self) -> Result<ApiClient, reqwest::Error> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("dashboard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(ApiClient {
            client,
            base_url: self.base_url,
            api_token: self.api_token,
        })
    }
}

/// HTTP client for the upstream REST API.
///
/// Serves as both the read path of the query coordinator and the write path
/// for lead mutations.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl ApiClient {
    pub fn from_settings(settings: &UpstreamSettings) -> Result<Self, reqwest::Error> {
        let mut builder = ApiClientBuilder::new(&settings.base_url)
            .timeout(Duration::from_secs(settings.timeout_secs));
        if let Some(token) = &settings.api_token {
            builder = builder.api_token(token);
        }
        builder.build()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn add_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, QueryError> {
        let response = self.add_auth(req).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&'static str, String)],
    ) -> Result<T, QueryError> {
        self.send(self.client.get(self.url(path)).query(params)).await
    }
}

#[async_trait]
impl Fetcher for ApiClient {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn fetch(&self, key: &QueryKey) -> Result<ResourceData, QueryError> {
        let params = query_params(key);
        let data = match key.resource {
            Resource::Webhooks => {
                let page: PagedEnvelope<WebhookEvent> = self.get("/webhooks", &params).await?;
                ResourceData::Webhooks(page.into())
            }
            Resource::WebhooksRecent => {
                let recent: Envelope<Vec<WebhookEvent>> =
                    self.get("/webhooks/recent", &params).await?;
                ResourceData::WebhooksRecent(recent.data)
            }
            Resource::WebhookStats => {
                let stats: Envelope<WebhookStats> = self.get("/webhooks/stats", &params).await?;
                ResourceData::WebhookStats(stats.data)
            }
            Resource::Leads => {
                let page: PagedEnvelope<Lead> = self.get("/leads", &params).await?;
                ResourceData::Leads(page.into())
            }
            Resource::LeadStats => {
                let stats: Envelope<LeadStats> = self.get("/leads/stats", &params).await?;
                ResourceData::LeadStats(stats.data)
            }
        };
        debug!(rows = data.row_count(), "Upstream query answered");
        Ok(data)
    }
}

#[async_trait]
impl LeadWriter for ApiClient {
    #[instrument(skip(self, input))]
    async fn create_lead(&self, input: &LeadInput) -> Result<Lead, QueryError> {
        let created: Envelope<Lead> = self
            .send(self.client.post(self.url("/leads")).json(input))
            .await?;
        Ok(created.data)
    }

    #[instrument(skip(self, input))]
    async fn update_lead(&self, id: &str, input: &LeadInput) -> Result<Lead, QueryError> {
        let updated: Envelope<Lead> = self
            .send(self.client.put(self.url(&format!("/leads/{}", id))).json(input))
            .await?;
        Ok(updated.data)
    }
}

/// Query string for `key`. Empty filter sets and unset bounds are omitted.
fn query_params(key: &QueryKey) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    match key.resource {
        Resource::Webhooks | Resource::Leads => {
            params.push(("page", key.page.to_string()));
            params.push(("limit", key.page_size.to_string()));
        }
        Resource::WebhooksRecent => params.push(("limit", key.page_size.to_string())),
        Resource::WebhookStats | Resource::LeadStats => return params,
    }

    if let (Some(sort_by), Some(order)) = (&key.sort_by, key.sort_order) {
        params.push(("sortBy", sort_by.clone()));
        params.push(("sortOrder", order.as_str().to_string()));
    }

    let filters = &key.filters;
    if let Some(source) = join(&filters.source) {
        params.push(("source", source));
    }
    if let Some(status) = join(&filters.status) {
        params.push(("status", status));
    }
    if let Some(from) = filters.date_from {
        params.push(("dateFrom", from.to_rfc3339()));
    }
    if let Some(to) = filters.date_to {
        params.push(("dateTo", to.to_rfc3339()));
    }
    params
}

fn join(values: &BTreeSet<String>) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().map(String::as_str).collect::<Vec<_>>().join(","))
    }
}

async fn check_status(response: Response) -> Result<Response, QueryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(QueryError::Server {
        status: status.as_u16(),
        message: error_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string()),
    })
}

/// `message` or `error` field of an error body, if it has one
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|field| value.get(field).and_then(|v| v.as_str()))
        .map(str::to_string)
}
