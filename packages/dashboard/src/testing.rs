use crate::error::QueryError;
use crate::filters::FilterState;
use crate::models::{
    Lead, LeadStats, PageResult, Pagination, ResourceData, WebhookEvent, WebhookSource,
    WebhookStats, WebhookStatus,
};
use crate::query::{Fetcher, QueryKey, Resource, SortOrder};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

pub const WEBHOOK_TOTAL: u32 = 47;
pub const LEAD_TOTAL: u32 = 12;

type Pending = (QueryKey, oneshot::Sender<Result<ResourceData, QueryError>>);

/// Fetcher that records every call and can hold responses until released
#[derive(Default)]
pub struct FakeFetcher {
    calls: Mutex<Vec<QueryKey>>,
    held: AtomicBool,
    pending: Mutex<Vec<Pending>>,
    failure: Mutex<Option<QueryError>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetcher whose calls stay pending until released
    pub fn held() -> Self {
        let fetcher = Self::default();
        fetcher.hold();
        fetcher
    }

    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn fail_with(&self, error: Option<QueryError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, key: &QueryKey) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| *k == key).count()
    }

    pub fn calls_for_resource(&self, resource: Resource) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.resource == resource)
            .count()
    }

    pub fn last_call(&self) -> Option<QueryKey> {
        self.calls.lock().unwrap().last().cloned()
    }

    /// Resolve every pending call for `key` with the canned response
    pub fn release(&self, key: &QueryKey) {
        let outcome = self.respond(key);
        self.release_with(key, outcome);
    }

    pub fn release_with(&self, key: &QueryKey, outcome: Result<ResourceData, QueryError>) {
        let mut pending = self.pending.lock().unwrap();
        let (matching, rest): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|(k, _)| k == key);
        *pending = rest;
        drop(pending);

        for (_, tx) in matching {
            let _ = tx.send(outcome.clone());
        }
    }

    pub fn release_all(&self) {
        let pending: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for (key, tx) in pending {
            let _ = tx.send(self.respond(&key));
        }
    }

    fn respond(&self, key: &QueryKey) -> Result<ResourceData, QueryError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(canned(key))
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, key: &QueryKey) -> Result<ResourceData, QueryError> {
        self.calls.lock().unwrap().push(key.clone());
        if !self.held.load(Ordering::SeqCst) {
            return self.respond(key);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push((key.clone(), tx));
        rx.await
            .unwrap_or_else(|_| Err(QueryError::Network("fake dropped".to_string())))
    }
}

/// Let spawned tasks run until they block
pub async fn drain() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn webhooks_key(page: u32) -> QueryKey {
    QueryKey {
        resource: Resource::Webhooks,
        page,
        page_size: 20,
        sort_by: Some("received_at".to_string()),
        sort_order: Some(SortOrder::Desc),
        filters: FilterState::default(),
    }
}

pub fn sample_event(n: u32) -> WebhookEvent {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    WebhookEvent {
        id: format!("evt-{}", n),
        source: if n % 2 == 0 {
            WebhookSource::Calcom
        } else {
            WebhookSource::Typeform
        },
        endpoint: "/webhooks/intake".to_string(),
        status: WebhookStatus::Processed,
        received_at: base - ChronoDuration::minutes(i64::from(n)),
        response_code: Some(200),
        response_body: Some(json!({"ok": true})),
        error_message: None,
        signature_valid: Some(true),
        payload: json!({"answers": {"email": format!("lead{}@example.com", n)}}),
        headers: json!({"content-type": "application/json"}),
        lead_id: Some(format!("lead-{}", n)),
    }
}

fn sample_lead(n: u32) -> Lead {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    Lead {
        id: format!("lead-{}", n),
        name: format!("Lead {}", n),
        email: format!("lead{}@example.com", n),
        phone: None,
        company: None,
        status: "new".to_string(),
        source: "typeform".to_string(),
        notes: None,
        created_at: at,
        updated_at: at,
    }
}

fn page_of<T>(key: &QueryKey, total: u32, make: fn(u32) -> T) -> PageResult<T> {
    let size = key.page_size.max(1);
    let total_pages = total.div_ceil(size);
    let start = (key.page - 1) * size + 1;
    let end = (start + size - 1).min(total);
    PageResult {
        items: (start..=end).map(make).collect(),
        pagination: Pagination {
            page: key.page,
            total_pages,
            total_count: u64::from(total),
        },
    }
}

fn canned(key: &QueryKey) -> ResourceData {
    match key.resource {
        Resource::Webhooks => ResourceData::Webhooks(page_of(key, WEBHOOK_TOTAL, sample_event)),
        Resource::WebhooksRecent => {
            ResourceData::WebhooksRecent((1..=key.page_size).map(sample_event).collect())
        }
        Resource::WebhookStats => ResourceData::WebhookStats(WebhookStats {
            total: u64::from(WEBHOOK_TOTAL),
            last24_hours: 5,
            failed_last24_hours: 1,
            ..Default::default()
        }),
        Resource::Leads => ResourceData::Leads(page_of(key, LEAD_TOTAL, sample_lead)),
        Resource::LeadStats => ResourceData::LeadStats(LeadStats {
            total: u64::from(LEAD_TOTAL),
            ..Default::default()
        }),
    }
}
