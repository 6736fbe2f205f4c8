use crate::bus::{RefreshBus, Subscription};
use crate::config::EngineSettings;
use crate::error::{AppError, AppResult, QueryError};
use crate::filters::{FilterScope, FilterState, FilterStore};
use crate::inspector::{Clipboard, Inspector, InspectorField};
use crate::models::{Notification, ResourceData, WebhookEvent};
use crate::query::{FetchHandle, FetchOutcome, QueryCoordinator, QueryKey, Resource};
use crate::table::{clamp_page, default_sort, sortable_columns, PaginationControls, SortState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::IntoFuture;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Screens an operator can open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewKind {
    WebhookLog,
    RecentWebhooks,
    WebhookStats,
    LeadList,
    LeadStats,
}

impl ViewKind {
    pub fn resource(&self) -> Resource {
        match self {
            ViewKind::WebhookLog => Resource::Webhooks,
            ViewKind::RecentWebhooks => Resource::WebhooksRecent,
            ViewKind::WebhookStats => Resource::WebhookStats,
            ViewKind::LeadList => Resource::Leads,
            ViewKind::LeadStats => Resource::LeadStats,
        }
    }

    pub fn filter_scope(&self) -> Option<FilterScope> {
        match self {
            ViewKind::WebhookLog => Some(FilterScope::Webhooks),
            ViewKind::LeadList => Some(FilterScope::Leads),
            _ => None,
        }
    }

    fn page_size(&self, engine: &EngineSettings) -> u32 {
        match self {
            ViewKind::WebhookLog => engine.webhook_page_size,
            ViewKind::RecentWebhooks => engine.recent_webhooks_limit,
            ViewKind::LeadList => engine.lead_page_size,
            ViewKind::WebhookStats | ViewKind::LeadStats => 0,
        }
    }

    /// The webhook log is the live screen; everything else is a summary
    fn poll_interval(&self, engine: &EngineSettings) -> Duration {
        match self {
            ViewKind::WebhookLog => Duration::from_secs(engine.webhook_poll_secs),
            _ => Duration::from_secs(engine.summary_poll_secs),
        }
    }
}

/// Shared collaborators every view is built from
#[derive(Clone)]
pub struct ViewContext {
    pub coordinator: QueryCoordinator,
    pub filters: FilterStore,
    pub bus: RefreshBus,
    pub clipboard: Arc<dyn Clipboard>,
    pub engine: EngineSettings,
}

/// Everything the browser needs to render a view
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub view_id: Uuid,
    pub kind: ViewKind,
    pub resource: Resource,
    pub page: u32,
    pub sort: Option<SortState>,
    pub filters: Option<FilterState>,
    pub is_loading: bool,
    pub is_fetching: bool,
    /// Rows belong to an earlier key while the current one loads
    pub is_previous_data: bool,
    pub error: Option<String>,
    pub data: Option<Arc<ResourceData>>,
    pub pagination: Option<PaginationControls>,
    pub inspector: Option<WebhookEvent>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Mount,
    KeyChange,
    Manual,
    Poll,
    Refresh,
    Invalidated,
}

struct ViewState {
    sort: Option<SortState>,
    page: u32,
    /// Filters the current page number was chosen under
    filters: FilterState,
    displayed: Option<Arc<ResourceData>>,
    displayed_key: Option<QueryKey>,
    error: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    inspector: Inspector,
    watching: HashSet<u64>,
    last_access: Instant,
}

/// A mounted dashboard view: the operator's sort, page and inspector
/// selection over one dataset, published as [`ViewSnapshot`]s.
///
/// Resolutions are applied only if they belong to the key the view shows
/// when they arrive; anything else is discarded.
pub struct View {
    id: Uuid,
    kind: ViewKind,
    page_size: u32,
    ctx: ViewContext,
    state: Mutex<ViewState>,
    snapshots: watch::Sender<ViewSnapshot>,
    notifications: broadcast::Sender<Notification>,
    cancel: CancellationToken,
}

impl View {
    /// Mount a view: restore filters, start the first fetch and the driver
    pub fn mount(kind: ViewKind, ctx: ViewContext) -> Arc<View> {
        let id = Uuid::now_v7();
        let scope = kind.filter_scope();
        let filters = scope
            .map(|s| ctx.filters.get_filters(s))
            .unwrap_or_default();
        let state = ViewState {
            sort: default_sort(kind.resource()),
            page: 1,
            filters,
            displayed: None,
            displayed_key: None,
            error: None,
            updated_at: None,
            inspector: Inspector::default(),
            watching: HashSet::new(),
            last_access: Instant::now(),
        };

        let page_size = kind.page_size(&ctx.engine);
        let initial = ViewSnapshot {
            view_id: id,
            kind,
            resource: kind.resource(),
            page: state.page,
            sort: state.sort.clone(),
            filters: scope.map(|_| state.filters.clone()),
            is_loading: true,
            is_fetching: false,
            is_previous_data: false,
            error: None,
            data: None,
            pagination: None,
            inspector: None,
            updated_at: None,
        };

        let (notifications, _) = broadcast::channel(16);
        let driver = Driver {
            view: Weak::new(),
            cancel: CancellationToken::new(),
            resource: kind.resource(),
            poll: kind.poll_interval(&ctx.engine),
            refresh: ctx.bus.subscribe(),
            filters: scope.map(|s| ctx.filters.subscribe(s)),
            invalidations: ctx.coordinator.subscribe_invalidations(),
        };

        let view = Arc::new(View {
            id,
            kind,
            page_size,
            cancel: driver.cancel.clone(),
            ctx,
            state: Mutex::new(state),
            snapshots: watch::Sender::new(initial),
            notifications,
        });

        view.revalidate(Trigger::Mount);
        tokio::spawn(
            Driver {
                view: Arc::downgrade(&view),
                ..driver
            }
            .run(),
        );

        info!(view_id = %id, kind = ?kind, "View mounted");
        view
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Key for what the view should show right now.
    ///
    /// Reads the filter store directly so a poll tick never uses filters
    /// older than the last write, and moves back to page 1 when they changed.
    fn active_key(&self, state: &mut ViewState) -> QueryKey {
        if let Some(scope) = self.kind.filter_scope() {
            let current = self.ctx.filters.get_filters(scope);
            if current != state.filters {
                state.filters = current;
                state.page = 1;
            }
        }

        QueryKey {
            resource: self.kind.resource(),
            page: state.page,
            page_size: self.page_size,
            sort_by: state.sort.as_ref().map(|s| s.sort_by.clone()),
            sort_order: state.sort.as_ref().map(|s| s.sort_order),
            filters: state.filters.clone(),
        }
    }

    fn revalidate(self: &Arc<Self>, trigger: Trigger) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut state = self.lock();
        let key = self.active_key(&mut state);
        let coordinator = &self.ctx.coordinator;

        let handle = match trigger {
            Trigger::Poll if coordinator.is_in_flight(&key) => {
                debug!(view_id = %self.id, key = %key, "Poll tick skipped, query already in flight");
                return;
            }
            Trigger::Mount | Trigger::KeyChange => coordinator.ensure(&key),
            Trigger::Manual | Trigger::Poll | Trigger::Refresh | Trigger::Invalidated => {
                Some(coordinator.revalidate(&key))
            }
        };

        // whatever is cached for the active key is better than rows of another key
        if state.displayed_key.as_ref() != Some(&key) {
            let cached = coordinator.peek(&key);
            if let Some(data) = cached.data {
                Self::show(&mut state, &key, data, cached.updated_at);
            }
        }

        if let Some(handle) = handle {
            debug!(
                view_id = %self.id,
                key = %key,
                trigger = ?trigger,
                fetch_id = handle.id(),
                "Revalidating view"
            );
            if state.watching.insert(handle.id()) {
                self.watch_fetch(key, handle);
            }
        }
        self.publish(&mut state);
    }

    fn watch_fetch(self: &Arc<Self>, key: QueryKey, handle: FetchHandle) {
        let view = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let fetch_id = handle.id();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = handle.into_future() => outcome,
            };
            if let Some(view) = view.upgrade() {
                view.resolve(fetch_id, &key, outcome);
            }
        });
    }

    fn resolve(&self, fetch_id: u64, key: &QueryKey, outcome: FetchOutcome) {
        let mut state = self.lock();
        state.watching.remove(&fetch_id);
        if self.cancel.is_cancelled() {
            return;
        }

        let active = self.active_key(&mut state);
        if *key != active {
            debug!(
                view_id = %self.id,
                key = %key,
                active = %active,
                reason = %QueryError::StaleResolutionDiscarded,
                "Discarding resolution for superseded key"
            );
            return;
        }

        match outcome {
            Ok(data) => Self::show(&mut state, key, data, Some(Utc::now())),
            Err(QueryError::StaleResolutionDiscarded) => {}
            Err(err) => {
                warn!(view_id = %self.id, key = %key, error = %err, "View refresh failed");
                state.error = Some(err.to_string());
                let _ = self.notifications.send(Notification::error(format!(
                    "Failed to refresh {}: {}",
                    self.kind.resource(),
                    err
                )));
            }
        }
        self.publish(&mut state);
    }

    fn show(
        state: &mut ViewState,
        key: &QueryKey,
        data: Arc<ResourceData>,
        updated_at: Option<DateTime<Utc>>,
    ) {
        state.displayed = Some(data);
        state.displayed_key = Some(key.clone());
        state.error = None;
        state.updated_at = updated_at;
    }

    fn build_snapshot(&self, state: &mut ViewState) -> ViewSnapshot {
        let key = self.active_key(state);
        let is_fetching = self.ctx.coordinator.is_in_flight(&key);
        let pagination = state.displayed.as_ref().and_then(|data| {
            data.pagination()
                .map(|p| PaginationControls::new(p, self.page_size, data.row_count()))
        });

        ViewSnapshot {
            view_id: self.id,
            kind: self.kind,
            resource: key.resource,
            page: key.page,
            sort: state.sort.clone(),
            filters: self.kind.filter_scope().map(|_| key.filters.clone()),
            is_loading: state.displayed.is_none() && is_fetching,
            is_fetching,
            is_previous_data: state.displayed_key.as_ref().is_some_and(|k| *k != key),
            error: state.error.clone(),
            data: state.displayed.clone(),
            pagination,
            inspector: state.inspector.selected().cloned(),
            updated_at: state.updated_at,
        }
    }

    fn publish(&self, state: &mut ViewState) {
        let snapshot = self.build_snapshot(state);
        self.snapshots.send_replace(snapshot);
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let mut state = self.lock();
        state.last_access = Instant::now();
        self.build_snapshot(&mut state)
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<ViewSnapshot> {
        self.lock().last_access = Instant::now();
        self.snapshots.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Token cancelled when this view is unmounted
    pub fn lifetime(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Column header click
    pub fn toggle_sort(self: &Arc<Self>, column: &str) -> AppResult<()> {
        let resource = self.kind.resource();
        if !sortable_columns(resource).contains(&column) {
            return Err(AppError::Validation(format!(
                "{} cannot be sorted by '{}'",
                resource, column
            )));
        }
        {
            let mut state = self.lock();
            let sort = match state.sort.take() {
                Some(mut sort) => {
                    sort.toggle(column);
                    sort
                }
                None => SortState::descending(column),
            };
            state.sort = Some(sort);
            state.page = 1;
        }
        self.revalidate(Trigger::KeyChange);
        Ok(())
    }

    /// Move to `requested`. Out-of-range pages are ignored and `false` is
    /// returned; no upstream request is made for them.
    pub fn set_page(self: &Arc<Self>, requested: i64) -> bool {
        {
            let mut state = self.lock();
            let active = self.active_key(&mut state);
            // page counts of another filter or sort say nothing about this listing
            let total_pages = state
                .displayed_key
                .as_ref()
                .filter(|shown| same_listing(shown, &active))
                .and(state.displayed.as_ref())
                .and_then(|d| d.pagination())
                .map(|p| p.total_pages);
            let Some(page) = clamp_page(requested, total_pages) else {
                debug!(view_id = %self.id, requested = requested, "Page out of range, ignored");
                return false;
            };
            state.page = page;
        }
        self.revalidate(Trigger::KeyChange);
        true
    }

    /// Manual refresh button
    pub fn refresh(self: &Arc<Self>) {
        self.revalidate(Trigger::Manual);
    }

    /// Open the detail panel on a row of the current page
    pub fn select_event(&self, event_id: &str) -> AppResult<()> {
        let mut state = self.lock();
        let event = state
            .displayed
            .as_ref()
            .and_then(|d| d.webhook_events().iter().find(|e| e.id == event_id))
            .cloned()
            .ok_or_else(|| AppError::EventNotFound(event_id.to_string()))?;

        state.inspector.select(&event);
        self.publish(&mut state);
        Ok(())
    }

    pub fn close_inspector(&self) {
        let mut state = self.lock();
        state.inspector.close();
        self.publish(&mut state);
    }

    pub fn copy_field(&self, field: InspectorField) -> Notification {
        let inspector = self.lock().inspector.clone();
        let notification = inspector.copy(field, self.ctx.clipboard.as_ref());
        let _ = self.notifications.send(notification.clone());
        notification
    }

    /// Rendered value of `field` on the inspected event, for the browser's
    /// own clipboard
    pub fn field_text(&self, field: InspectorField) -> Option<String> {
        self.lock().inspector.text(field)
    }

    /// Stop polling, drop subscriptions and ignore any fetch still pending
    pub fn unmount(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            info!(view_id = %self.id, kind = ?self.kind, "View unmounted");
        }
    }

    fn idle_for(&self) -> Duration {
        self.lock().last_access.elapsed()
    }

    /// An open snapshot stream counts as activity
    fn is_watched(&self) -> bool {
        self.snapshots.receiver_count() > 0
    }
}

/// Same rows in the same order, possibly on another page
fn same_listing(a: &QueryKey, b: &QueryKey) -> bool {
    a.resource == b.resource
        && a.page_size == b.page_size
        && a.sort_by == b.sort_by
        && a.sort_order == b.sort_order
        && a.filters == b.filters
}

impl Drop for View {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Background loop of one view: polling, refresh bus, filter changes and
/// invalidations. Holds only a weak reference so it never keeps a view alive.
struct Driver {
    view: Weak<View>,
    cancel: CancellationToken,
    resource: Resource,
    poll: Duration,
    refresh: Subscription,
    filters: Option<watch::Receiver<FilterState>>,
    invalidations: broadcast::Receiver<Resource>,
}

enum DriverEvent {
    Cancelled,
    Tick,
    Refresh,
    FiltersChanged,
    Invalidated(Result<Resource, broadcast::error::RecvError>),
}

impl Driver {
    async fn run(mut self) {
        let mut ticker: Interval = interval_at(Instant::now() + self.poll, self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => DriverEvent::Cancelled,
                _ = ticker.tick() => DriverEvent::Tick,
                signal = self.refresh.recv() => match signal {
                    Some(()) => DriverEvent::Refresh,
                    None => DriverEvent::Cancelled,
                },
                _ = next_filter_change(&mut self.filters) => DriverEvent::FiltersChanged,
                msg = self.invalidations.recv() => DriverEvent::Invalidated(msg),
            };

            let trigger = match event {
                DriverEvent::Cancelled => break,
                DriverEvent::Tick => Trigger::Poll,
                DriverEvent::Refresh => Trigger::Refresh,
                DriverEvent::FiltersChanged => Trigger::KeyChange,
                DriverEvent::Invalidated(Ok(resource)) if resource == self.resource => {
                    Trigger::Invalidated
                }
                DriverEvent::Invalidated(Ok(_)) => continue,
                DriverEvent::Invalidated(Err(broadcast::error::RecvError::Lagged(_))) => {
                    Trigger::Invalidated
                }
                DriverEvent::Invalidated(Err(broadcast::error::RecvError::Closed)) => break,
            };

            let Some(view) = self.view.upgrade() else {
                break;
            };
            view.revalidate(trigger);
        }
        debug!(resource = %self.resource, "View driver stopped");
    }
}

async fn next_filter_change(rx: &mut Option<watch::Receiver<FilterState>>) {
    match rx {
        Some(receiver) => {
            if receiver.changed().await.is_err() {
                // store gone; stop listening
                *rx = None;
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

/// Mounted views by id
#[derive(Clone, Default)]
pub struct ViewRegistry {
    views: Arc<RwLock<HashMap<Uuid, Arc<View>>>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mount(&self, kind: ViewKind, ctx: ViewContext) -> Arc<View> {
        let view = View::mount(kind, ctx);
        self.views.write().await.insert(view.id(), view.clone());
        view
    }

    pub async fn get(&self, id: &Uuid) -> AppResult<Arc<View>> {
        self.views
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(AppError::ViewNotFound)
    }

    pub async fn unmount(&self, id: &Uuid) -> AppResult<()> {
        let view = self
            .views
            .write()
            .await
            .remove(id)
            .ok_or(AppError::ViewNotFound)?;
        view.unmount();
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.views.read().await.len()
    }

    /// Unmount views no client has touched for `max_idle` and nobody streams
    pub async fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let mut views = self.views.write().await;
        let before = views.len();
        views.retain(|_, view| {
            let keep = view.is_watched() || view.idle_for() < max_idle;
            if !keep {
                view.unmount();
            }
            keep
        });
        before - views.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterPatch;
    use crate::inspector::MockClipboard;
    use crate::models::NotificationLevel;
    use crate::testing::{drain, FakeFetcher};

    struct Harness {
        fetcher: Arc<FakeFetcher>,
        ctx: ViewContext,
    }

    fn harness(fetcher: FakeFetcher) -> Harness {
        let fetcher = Arc::new(fetcher);
        let engine = EngineSettings::default();
        let mut clipboard = MockClipboard::new();
        clipboard.expect_set_text().returning(|_| Ok(()));
        let ctx = ViewContext {
            coordinator: QueryCoordinator::new(fetcher.clone(), engine.stale_time()),
            filters: FilterStore::new(),
            bus: RefreshBus::new(),
            clipboard: Arc::new(clipboard),
            engine,
        };
        Harness { fetcher, ctx }
    }

    fn page_of(snapshot: &ViewSnapshot) -> Option<u32> {
        snapshot.data.as_ref().and_then(|d| d.pagination()).map(|p| p.page)
    }

    #[tokio::test(start_paused = true)]
    async fn last_page_shows_remaining_rows_and_disables_next() {
        let h = harness(FakeFetcher::new());
        let view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;

        assert!(view.set_page(3));
        drain().await;

        let snapshot = view.snapshot();
        let controls = snapshot.pagination.unwrap();
        assert_eq!(snapshot.data.as_ref().unwrap().row_count(), 7);
        assert_eq!((controls.first_row, controls.last_row), (41, 47));
        assert!(!controls.has_next);

        let calls = h.fetcher.call_count();
        assert!(!view.set_page(4));
        assert!(!view.set_page(0));
        drain().await;
        assert_eq!(h.fetcher.call_count(), calls);
        assert_eq!(view.snapshot().page, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn late_resolution_for_superseded_key_is_discarded() {
        let h = harness(FakeFetcher::held());
        let view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;
        let first = h.fetcher.last_call().unwrap();
        h.fetcher.release(&first);
        drain().await;

        assert!(view.set_page(2));
        drain().await;
        let stale = h.fetcher.last_call().unwrap();
        assert!(view.set_page(3));
        drain().await;
        let current = h.fetcher.last_call().unwrap();
        assert_eq!((stale.page, current.page), (2, 3));

        h.fetcher.release(&current);
        drain().await;
        h.fetcher.release(&stale);
        drain().await;

        let snapshot = view.snapshot();
        assert_eq!(snapshot.page, 3);
        assert_eq!(page_of(&snapshot), Some(3));
        assert!(!snapshot.is_previous_data);
    }

    #[tokio::test(start_paused = true)]
    async fn previous_rows_stay_visible_while_next_page_loads() {
        let h = harness(FakeFetcher::held());
        let view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;
        assert!(view.snapshot().is_loading);
        h.fetcher.release_all();
        drain().await;

        view.set_page(2);
        drain().await;

        let snapshot = view.snapshot();
        assert_eq!(page_of(&snapshot), Some(1));
        assert!(snapshot.is_fetching);
        assert!(!snapshot.is_loading);
        assert!(snapshot.is_previous_data);
        h.fetcher.release_all();
    }

    #[tokio::test(start_paused = true)]
    async fn filter_and_sort_changes_reset_to_first_page() {
        let h = harness(FakeFetcher::new());
        let view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;
        view.set_page(2);
        drain().await;

        h.ctx.filters.set_filters(
            FilterScope::Webhooks,
            &FilterPatch {
                source: Some(vec!["calcom".to_string()]),
                ..Default::default()
            },
        );
        drain().await;

        let last = h.fetcher.last_call().unwrap();
        assert_eq!(last.page, 1);
        assert!(last.filters.source.contains("calcom"));
        assert_eq!(view.snapshot().page, 1);

        view.set_page(2);
        view.toggle_sort("source").unwrap();
        drain().await;
        let last = h.fetcher.last_call().unwrap();
        assert_eq!(last.page, 1);
        assert_eq!(last.sort_by.as_deref(), Some("source"));
        assert!(view.toggle_sort("payload").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn page_bound_ignores_page_count_of_previous_filters() {
        let h = harness(FakeFetcher::held());
        let view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;
        h.fetcher.release_all();
        drain().await;
        let shown = view.snapshot().data.unwrap().pagination().unwrap();
        assert_eq!(shown.total_pages, 3);

        h.ctx.filters.set_filters(
            FilterScope::Webhooks,
            &FilterPatch {
                source: Some(vec!["calcom".to_string()]),
                ..Default::default()
            },
        );
        assert!(!view.set_page(3));
        drain().await;
        assert!(!view.set_page(2));
        drain().await;

        let last = h.fetcher.last_call().unwrap();
        assert_eq!(last.page, 1);
        assert!(last.filters.source.contains("calcom"));
        assert!(view.snapshot().is_previous_data);

        h.fetcher.release_all();
        drain().await;
        assert!(view.set_page(3));
        drain().await;
        let last = h.fetcher.last_call().unwrap();
        assert_eq!(last.page, 3);
        assert!(last.filters.source.contains("calcom"));
        h.fetcher.release_all();
    }

    #[tokio::test(start_paused = true)]
    async fn poll_ticks_revalidate_and_skip_while_in_flight() {
        let h = harness(FakeFetcher::new());
        let view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;
        assert_eq!(h.fetcher.call_count(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        drain().await;
        assert_eq!(h.fetcher.call_count(), 2);

        h.fetcher.hold();
        view.refresh();
        drain().await;
        assert_eq!(h.fetcher.call_count(), 3);

        tokio::time::advance(Duration::from_secs(5)).await;
        drain().await;
        assert_eq!(h.fetcher.call_count(), 3);
        h.fetcher.release_all();
    }

    #[tokio::test(start_paused = true)]
    async fn poll_tick_uses_latest_filters() {
        let h = harness(FakeFetcher::new());
        let _view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;

        h.ctx.filters.set_filters(
            FilterScope::Webhooks,
            &FilterPatch {
                status: Some(vec!["failed".to_string()]),
                ..Default::default()
            },
        );
        tokio::time::advance(Duration::from_secs(5)).await;
        drain().await;

        let last = h.fetcher.last_call().unwrap();
        assert!(last.filters.status.contains("failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_stops_polling_and_releases_subscription() {
        let h = harness(FakeFetcher::new());
        let view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;
        assert_eq!(h.ctx.bus.subscriber_count(), 1);

        view.unmount();
        drain().await;
        assert_eq!(h.ctx.bus.subscriber_count(), 0);

        tokio::time::advance(Duration::from_secs(30)).await;
        drain().await;
        assert_eq!(h.fetcher.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_mid_fetch_discards_resolution() {
        let h = harness(FakeFetcher::held());
        let view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;

        view.unmount();
        h.fetcher.release_all();
        drain().await;

        assert!(view.snapshot().data.is_none());
        assert_eq!(h.ctx.bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_bus_revalidates_each_view_on_its_own_key() {
        let h = harness(FakeFetcher::new());
        let _log = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        let _stats = View::mount(ViewKind::LeadStats, h.ctx.clone());
        drain().await;

        assert_eq!(h.ctx.bus.publish(), 2);
        drain().await;

        assert_eq!(h.fetcher.calls_for_resource(Resource::Webhooks), 2);
        assert_eq!(h.fetcher.calls_for_resource(Resource::LeadStats), 2);
        assert_eq!(h.fetcher.calls_for_resource(Resource::Leads), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lead_invalidation_leaves_webhook_views_alone() {
        let h = harness(FakeFetcher::new());
        let _log = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        let _leads = View::mount(ViewKind::LeadList, h.ctx.clone());
        drain().await;

        h.ctx
            .coordinator
            .invalidate(&[Resource::Leads, Resource::LeadStats]);
        drain().await;

        assert_eq!(h.fetcher.calls_for_resource(Resource::Leads), 2);
        assert_eq!(h.fetcher.calls_for_resource(Resource::Webhooks), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_rows_and_notifies() {
        let h = harness(FakeFetcher::new());
        let view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;
        let mut notifications = view.subscribe_notifications();

        h.fetcher
            .fail_with(Some(QueryError::Network("connection reset".to_string())));
        view.refresh();
        drain().await;

        let snapshot = view.snapshot();
        assert!(snapshot.data.is_some());
        assert!(snapshot.error.unwrap().contains("connection reset"));
        let note = notifications.recv().await.unwrap();
        assert_eq!(note.level, NotificationLevel::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn remount_restores_filters_and_reuses_fresh_cache() {
        let h = harness(FakeFetcher::new());
        h.ctx.filters.set_filters(
            FilterScope::Webhooks,
            &FilterPatch {
                source: Some(vec!["typeform".to_string()]),
                ..Default::default()
            },
        );
        let first = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;
        first.unmount();

        let second = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        let snapshot = second.snapshot();
        assert!(snapshot.filters.unwrap().source.contains("typeform"));
        assert!(snapshot.data.is_some());
        drain().await;
        assert_eq!(h.fetcher.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inspector_selects_rows_of_the_current_page() {
        let h = harness(FakeFetcher::new());
        let view = View::mount(ViewKind::WebhookLog, h.ctx.clone());
        drain().await;

        assert!(matches!(
            view.select_event("evt-999"),
            Err(AppError::EventNotFound(_))
        ));
        view.select_event("evt-3").unwrap();
        assert_eq!(view.snapshot().inspector.unwrap().id, "evt-3");

        let note = view.copy_field(InspectorField::Payload);
        assert_eq!(note.level, NotificationLevel::Success);

        view.close_inspector();
        assert!(view.snapshot().inspector.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn streamed_views_are_not_reaped_as_idle() {
        let h = harness(FakeFetcher::new());
        let registry = ViewRegistry::new();
        let view = registry.mount(ViewKind::WebhookLog, h.ctx.clone()).await;
        let stream = view.subscribe_snapshots();
        drain().await;

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(registry.cleanup_idle(Duration::from_secs(60)).await, 0);
        assert!(registry.get(&view.id()).await.is_ok());

        drop(stream);
        assert_eq!(registry.cleanup_idle(Duration::from_secs(60)).await, 1);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_unmounts_idle_views() {
        let h = harness(FakeFetcher::new());
        let registry = ViewRegistry::new();
        let busy = registry.mount(ViewKind::WebhookLog, h.ctx.clone()).await;
        let idle = registry.mount(ViewKind::LeadStats, h.ctx.clone()).await;
        drain().await;

        tokio::time::advance(Duration::from_secs(50)).await;
        busy.snapshot();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(registry.cleanup_idle(Duration::from_secs(60)).await, 1);
        assert_eq!(registry.count().await, 1);
        assert!(registry.get(&idle.id()).await.is_err());
        assert!(registry.unmount(&busy.id()).await.is_ok());
    }
}
