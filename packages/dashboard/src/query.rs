use crate::error::QueryError;
use crate::filters::FilterState;
use crate::models::ResourceData;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upstream datasets the dashboard reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resource {
    Webhooks,
    WebhooksRecent,
    WebhookStats,
    Leads,
    LeadStats,
}

impl Resource {
    pub fn name(&self) -> &'static str {
        match self {
            Resource::Webhooks => "webhooks",
            Resource::WebhooksRecent => "webhooksRecent",
            Resource::WebhookStats => "webhookStats",
            Resource::Leads => "leads",
            Resource::LeadStats => "leadStats",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn toggled(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Deterministic fingerprint of one cacheable request.
///
/// Filter sets are ordered, so comparing the state is the same as comparing
/// its serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub resource: Resource,
    pub page: u32,
    pub page_size: u32,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub filters: FilterState,
}

impl QueryKey {
    /// Key for an unpaginated, unsorted, unfiltered resource
    pub fn plain(resource: Resource, limit: u32) -> Self {
        Self {
            resource,
            page: 1,
            page_size: limit,
            sort_by: None,
            sort_order: None,
            filters: FilterState::default(),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?page={}", self.resource, self.page)?;
        if self.page_size > 0 {
            write!(f, "&limit={}", self.page_size)?;
        }
        if let (Some(sort_by), Some(order)) = (&self.sort_by, self.sort_order) {
            write!(f, "&sortBy={}&sortOrder={}", sort_by, order.as_str())?;
        }
        if !self.filters.is_unfiltered() {
            write!(f, "&filters={}", self.filters.fingerprint())?;
        }
        Ok(())
    }
}

/// The upstream collaborator the coordinator reads through
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &QueryKey) -> Result<ResourceData, QueryError>;
}

pub type FetchOutcome = Result<Arc<ResourceData>, QueryError>;

type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Handle on an in-flight fetch; every clone resolves to the same outcome
#[derive(Clone)]
pub struct FetchHandle {
    id: u64,
    fetch: SharedFetch,
}

impl FetchHandle {
    /// Identifies the upstream call, shared by every coalesced caller
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl IntoFuture for FetchHandle {
    type Output = FetchOutcome;
    type IntoFuture = SharedFetch;

    fn into_future(self) -> Self::IntoFuture {
        self.fetch
    }
}

/// What a consumer sees for one key right now
#[derive(Debug, Clone)]
pub struct QueryState {
    pub data: Option<Arc<ResourceData>>,
    pub is_loading: bool,
    pub is_fetching: bool,
    pub error: Option<QueryError>,
    pub updated_at: Option<DateTime<Utc>>,
}

struct CacheEntry {
    data: Option<Arc<ResourceData>>,
    fetched_at: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
    invalidated: bool,
    error: Option<QueryError>,
    last_read: Instant,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            data: None,
            fetched_at: None,
            updated_at: None,
            invalidated: false,
            error: None,
            last_read: Instant::now(),
        }
    }

    fn is_fresh(&self, stale_time: Duration) -> bool {
        match (&self.data, self.fetched_at) {
            (Some(_), Some(at)) => !self.invalidated && at.elapsed() < stale_time,
            _ => false,
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<QueryKey, CacheEntry>,
    in_flight: HashMap<QueryKey, FetchHandle>,
}

struct Inner {
    fetcher: Arc<dyn Fetcher>,
    stale_time: Duration,
    state: Mutex<CacheState>,
    invalidations: broadcast::Sender<Resource>,
    next_fetch_id: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // the map stays consistent between statements, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn settle(&self, key: &QueryKey, fetch_id: u64, outcome: &FetchOutcome) {
        let mut state = self.lock();
        if state.in_flight.get(key).is_some_and(|f| f.id == fetch_id) {
            state.in_flight.remove(key);
        }

        let entry = state
            .entries
            .entry(key.clone())
            .or_insert_with(CacheEntry::new);
        match outcome {
            Ok(data) => {
                entry.data = Some(data.clone());
                entry.fetched_at = Some(Instant::now());
                entry.updated_at = Some(Utc::now());
                entry.invalidated = false;
                entry.error = None;
                debug!(key = %key, fetch_id = fetch_id, "Query settled");
            }
            Err(err) => {
                entry.error = Some(err.clone());
                warn!(
                    key = %key,
                    fetch_id = fetch_id,
                    error = %err,
                    kept_previous = entry.data.is_some(),
                    "Query failed"
                );
            }
        }
    }
}

/// Shared cache of query results with per-key request coalescing.
///
/// At most one upstream fetch is outstanding per key; callers asking for a
/// key already being fetched share the in-flight call. Fetches run as their
/// own tasks so the cache settles even if every waiting view went away.
#[derive(Clone)]
pub struct QueryCoordinator {
    inner: Arc<Inner>,
}

impl QueryCoordinator {
    pub fn new(fetcher: Arc<dyn Fetcher>, stale_time: Duration) -> Self {
        let (invalidations, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                fetcher,
                stale_time,
                state: Mutex::new(CacheState::default()),
                invalidations,
                next_fetch_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current state for `key`, starting a fetch when nothing fresh is cached
    pub fn query(&self, key: &QueryKey) -> QueryState {
        self.ensure(key);
        self.peek(key)
    }

    /// Current state for `key` without triggering anything
    pub fn peek(&self, key: &QueryKey) -> QueryState {
        let mut state = self.inner.lock();
        let is_fetching = state.in_flight.contains_key(key);
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_read = Instant::now();
                QueryState {
                    data: entry.data.clone(),
                    is_loading: entry.data.is_none() && is_fetching,
                    is_fetching,
                    error: entry.error.clone(),
                    updated_at: entry.updated_at,
                }
            }
            None => QueryState {
                data: None,
                is_loading: is_fetching,
                is_fetching,
                error: None,
                updated_at: None,
            },
        }
    }

    /// Returns `None` when a fresh result is cached, otherwise the in-flight
    /// fetch for `key` (started here if there was none).
    pub fn ensure(&self, key: &QueryKey) -> Option<FetchHandle> {
        let mut state = self.inner.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_read = Instant::now();
            if entry.is_fresh(self.inner.stale_time) {
                return None;
            }
        }
        Some(self.fetch_locked(&mut state, key))
    }

    /// Force a refetch of `key`, sharing the in-flight call if one exists
    pub fn revalidate(&self, key: &QueryKey) -> FetchHandle {
        let mut state = self.inner.lock();
        self.fetch_locked(&mut state, key)
    }

    pub fn is_in_flight(&self, key: &QueryKey) -> bool {
        self.inner.lock().in_flight.contains_key(key)
    }

    fn fetch_locked(&self, state: &mut CacheState, key: &QueryKey) -> FetchHandle {
        if let Some(in_flight) = state.in_flight.get(key) {
            debug!(key = %key, fetch_id = in_flight.id, "Joining in-flight query");
            return in_flight.clone();
        }

        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let fetcher = self.inner.fetcher.clone();
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let task_key = key.clone();

        debug!(key = %key, fetch_id = id, "Starting query");
        let task = tokio::spawn(async move {
            let outcome = fetcher.fetch(&task_key).await.map(Arc::new);
            if let Some(inner) = inner.upgrade() {
                inner.settle(&task_key, id, &outcome);
            }
            outcome
        });

        let fetch = async move {
            task.await
                .unwrap_or_else(|e| Err(QueryError::Network(format!("fetch task aborted: {}", e))))
        }
        .boxed()
        .shared();

        let handle = FetchHandle { id, fetch };
        state.in_flight.insert(key.clone(), handle.clone());
        handle
    }

    /// Mark every cached result of `resources` stale and tell mounted views.
    /// Entries of other resources are left untouched.
    pub fn invalidate(&self, resources: &[Resource]) -> usize {
        let mut marked = 0;
        {
            let mut state = self.inner.lock();
            for (key, entry) in state.entries.iter_mut() {
                if resources.contains(&key.resource) {
                    entry.invalidated = true;
                    marked += 1;
                }
            }
        }

        for resource in resources {
            // no receivers just means no view is mounted on it
            let _ = self.inner.invalidations.send(*resource);
        }

        info!(
            resources = ?resources.iter().map(Resource::name).collect::<Vec<_>>(),
            entries = marked,
            "Invalidated cached queries"
        );
        marked
    }

    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<Resource> {
        self.inner.invalidations.subscribe()
    }

    /// Drop settled entries nobody has read for `max_idle`
    pub fn collect_garbage(&self, max_idle: Duration) -> usize {
        let mut state = self.inner.lock();
        let CacheState { entries, in_flight } = &mut *state;
        let before = entries.len();
        entries.retain(|key, entry| {
            in_flight.contains_key(key) || entry.last_read.elapsed() < max_idle
        });
        before - entries.len()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
