use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Provider that delivered a webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookSource {
    Typeform,
    Calcom,
    Test,
    #[serde(other)]
    Unknown,
}

/// Processing state reported by the backend. The dashboard never drives
/// transitions and does not assume they are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Received,
    Processing,
    Processed,
    Failed,
}

/// One recorded delivery attempt from an external provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub source: WebhookSource,
    pub endpoint: String,
    pub status: WebhookStatus,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub response_code: Option<u16>,
    #[serde(default)]
    pub response_body: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub signature_valid: Option<bool>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub headers: serde_json::Value,
    #[serde(default)]
    pub lead_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    pub status: String,
    pub source: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body for creating or updating a lead
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub total_pages: u32,
    pub total_count: u64,
}

/// One page of a server-side paginated listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookStats {
    pub total: u64,
    pub last24_hours: u64,
    pub failed_last24_hours: u64,
    pub by_source: HashMap<String, u64>,
    pub by_status: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadStats {
    pub total: u64,
    pub by_status: HashMap<String, u64>,
    pub by_source: HashMap<String, u64>,
}

/// Settled result of one query, typed by resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ResourceData {
    Webhooks(PageResult<WebhookEvent>),
    WebhooksRecent(Vec<WebhookEvent>),
    WebhookStats(WebhookStats),
    Leads(PageResult<Lead>),
    LeadStats(LeadStats),
}

impl ResourceData {
    pub fn pagination(&self) -> Option<Pagination> {
        match self {
            ResourceData::Webhooks(page) => Some(page.pagination),
            ResourceData::Leads(page) => Some(page.pagination),
            _ => None,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            ResourceData::Webhooks(page) => page.items.len(),
            ResourceData::WebhooksRecent(events) => events.len(),
            ResourceData::Leads(page) => page.items.len(),
            _ => 0,
        }
    }

    /// Webhook rows carried by this result, if any
    pub fn webhook_events(&self) -> &[WebhookEvent] {
        match self {
            ResourceData::Webhooks(page) => &page.items,
            ResourceData::WebhooksRecent(events) => events,
            _ => &[],
        }
    }
}

/// Severity of a transient operator notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Error,
}

/// Short-lived message shown to the operator (toast)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

/// Request body for mounting a view
#[derive(Debug, Deserialize)]
pub struct MountViewRequest {
    pub kind: crate::view::ViewKind,
}

#[derive(Debug, Serialize)]
pub struct MountViewResponse {
    pub view_id: String,
    pub snapshot: crate::view::ViewSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct SortRequest {
    pub column: String,
}

#[derive(Debug, Deserialize)]
pub struct PageRequest {
    pub page: i64,
}

#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub applied: bool,
    pub snapshot: crate::view::ViewSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct SelectEventRequest {
    pub event_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CopyFieldRequest {
    pub field: crate::inspector::InspectorField,
}

/// Outcome of a copy; `text` lets the browser fill its own clipboard
#[derive(Debug, Serialize)]
pub struct CopyFieldResponse {
    pub notification: Notification,
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub subscribers: usize,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub mounted_views: usize,
    pub bus_subscribers: usize,
    pub cache_entries: usize,
}
