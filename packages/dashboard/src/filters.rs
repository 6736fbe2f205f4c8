use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

const WEBHOOK_SOURCES: &[&str] = &["typeform", "calcom", "test"];
const WEBHOOK_STATUSES: &[&str] = &["received", "processing", "processed", "failed"];
const LEAD_SOURCES: &[&str] = &["typeform", "calcom", "manual", "test"];
const LEAD_STATUSES: &[&str] = &["new", "contacted", "qualified", "converted", "lost"];

/// Independent filter namespaces. Webhook and lead filters never affect each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterScope {
    Webhooks,
    Leads,
}

impl FilterScope {
    pub const ALL: [FilterScope; 2] = [FilterScope::Webhooks, FilterScope::Leads];

    fn allowed_sources(&self) -> &'static [&'static str] {
        match self {
            FilterScope::Webhooks => WEBHOOK_SOURCES,
            FilterScope::Leads => LEAD_SOURCES,
        }
    }

    fn allowed_statuses(&self) -> &'static [&'static str] {
        match self {
            FilterScope::Webhooks => WEBHOOK_STATUSES,
            FilterScope::Leads => LEAD_STATUSES,
        }
    }
}

impl fmt::Display for FilterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterScope::Webhooks => write!(f, "webhooks"),
            FilterScope::Leads => write!(f, "leads"),
        }
    }
}

/// Operator-selected subset criteria for a list view.
///
/// Sets are ordered so two equal states always serialize to the same
/// text, which is what the query key is built from. An empty set means
/// "unfiltered", never "match nothing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    pub source: BTreeSet<String>,
    pub status: BTreeSet<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl FilterState {
    /// Canonical text form used inside query keys
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn is_unfiltered(&self) -> bool {
        *self == FilterState::default()
    }

    fn merged(&self, patch: &FilterPatch) -> FilterState {
        let mut next = self.clone();
        if let Some(source) = &patch.source {
            next.source = source.iter().cloned().collect();
        }
        if let Some(status) = &patch.status {
            next.status = status.iter().cloned().collect();
        }
        if let Some(date_from) = patch.date_from {
            next.date_from = date_from;
        }
        if let Some(date_to) = patch.date_to {
            next.date_to = date_to;
        }
        next
    }
}

/// Partial update for a [`FilterState`].
///
/// Absent fields are left alone; present set fields replace the whole set;
/// a date field given as `null` clears that bound.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPatch {
    #[serde(default)]
    pub source: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<Vec<String>>,
    #[serde(default, deserialize_with = "present")]
    pub date_from: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub date_to: Option<Option<DateTime<Utc>>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl FilterPatch {
    /// Check operator input against the tags a scope knows about and the
    /// resulting date range.
    pub fn validate(&self, scope: FilterScope, current: &FilterState) -> Result<(), String> {
        if let Some(source) = &self.source {
            if let Some(bad) = source
                .iter()
                .find(|s| !scope.allowed_sources().contains(&s.as_str()))
            {
                return Err(format!("unknown {} source '{}'", scope, bad));
            }
        }
        if let Some(status) = &self.status {
            if let Some(bad) = status
                .iter()
                .find(|s| !scope.allowed_statuses().contains(&s.as_str()))
            {
                return Err(format!("unknown {} status '{}'", scope, bad));
            }
        }

        let next = current.merged(self);
        if let (Some(from), Some(to)) = (next.date_from, next.date_to) {
            if from > to {
                return Err("dateFrom must not be after dateTo".to_string());
            }
        }
        Ok(())
    }
}

/// Process-wide filter state, one slot per scope.
///
/// Cloning the store shares the same slots. Writes are synchronous and
/// visible to every holder immediately; subscribers are only woken when a
/// write actually changes the state.
#[derive(Clone)]
pub struct FilterStore {
    slots: Arc<HashMap<FilterScope, watch::Sender<FilterState>>>,
}

impl Default for FilterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterStore {
    pub fn new() -> Self {
        let slots = FilterScope::ALL
            .into_iter()
            .map(|scope| (scope, watch::Sender::new(FilterState::default())))
            .collect();
        Self {
            slots: Arc::new(slots),
        }
    }

    fn slot(&self, scope: FilterScope) -> &watch::Sender<FilterState> {
        // every scope is populated in new()
        &self.slots[&scope]
    }

    pub fn get_filters(&self, scope: FilterScope) -> FilterState {
        self.slot(scope).borrow().clone()
    }

    pub fn set_filters(&self, scope: FilterScope, patch: &FilterPatch) -> FilterState {
        self.replace(scope, |current| current.merged(patch))
    }

    pub fn reset_filters(&self, scope: FilterScope) -> FilterState {
        self.replace(scope, |_| FilterState::default())
    }

    /// Receiver that observes every effective change to `scope`
    pub fn subscribe(&self, scope: FilterScope) -> watch::Receiver<FilterState> {
        self.slot(scope).subscribe()
    }

    fn replace<F>(&self, scope: FilterScope, f: F) -> FilterState
    where
        F: FnOnce(&FilterState) -> FilterState,
    {
        let slot = self.slot(scope);
        let changed = slot.send_if_modified(|state| {
            let next = f(state);
            if next == *state {
                false
            } else {
                *state = next;
                true
            }
        });

        let state = slot.borrow().clone();
        debug!(
            scope = %scope,
            changed = changed,
            filters = %state.fingerprint(),
            "Filters written"
        );
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch_sources(sources: &[&str]) -> FilterPatch {
        FilterPatch {
            source: Some(sources.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn reset_restores_exact_default() {
        let store = FilterStore::new();
        store.set_filters(FilterScope::Webhooks, &patch_sources(&["calcom"]));
        assert!(!store.get_filters(FilterScope::Webhooks).is_unfiltered());

        let reset = store.reset_filters(FilterScope::Webhooks);
        assert_eq!(reset, FilterState::default());
        assert!(reset.source.is_empty());
        assert!(reset.status.is_empty());
        assert!(reset.date_from.is_none());
        assert!(reset.date_to.is_none());
    }

    #[test]
    fn set_fields_replace_wholesale_and_drop_duplicates() {
        let store = FilterStore::new();
        store.set_filters(FilterScope::Webhooks, &patch_sources(&["calcom", "typeform"]));
        let state = store.set_filters(
            FilterScope::Webhooks,
            &patch_sources(&["test", "test", "calcom"]),
        );

        let sources: Vec<_> = state.source.iter().map(String::as_str).collect();
        assert_eq!(sources, vec!["calcom", "test"]);
    }

    #[test]
    fn merge_leaves_absent_fields_alone() {
        let store = FilterStore::new();
        store.set_filters(FilterScope::Webhooks, &patch_sources(&["calcom"]));
        let state = store.set_filters(
            FilterScope::Webhooks,
            &FilterPatch {
                status: Some(vec!["failed".to_string()]),
                ..Default::default()
            },
        );

        assert!(state.source.contains("calcom"));
        assert!(state.status.contains("failed"));
    }

    #[test]
    fn null_date_clears_bound() {
        let patch: FilterPatch =
            serde_json::from_str(r#"{"dateFrom":"2024-05-01T00:00:00Z"}"#).unwrap();
        let store = FilterStore::new();
        let state = store.set_filters(FilterScope::Webhooks, &patch);
        assert!(state.date_from.is_some());

        let clear: FilterPatch = serde_json::from_str(r#"{"dateFrom":null}"#).unwrap();
        let state = store.set_filters(FilterScope::Webhooks, &clear);
        assert!(state.date_from.is_none());

        let untouched: FilterPatch = serde_json::from_str(r#"{}"#).unwrap();
        assert!(untouched.date_from.is_none());
    }

    #[test]
    fn scopes_are_independent() {
        let store = FilterStore::new();
        store.set_filters(FilterScope::Leads, &patch_sources(&["manual"]));
        assert!(store.get_filters(FilterScope::Webhooks).is_unfiltered());
    }

    #[test]
    fn fingerprint_changes_iff_state_changes() {
        let a = FilterState::default();
        let mut b = FilterState::default();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.source.insert("calcom".to_string());
        assert_ne!(a.fingerprint(), b.fingerprint());

        let mut c = FilterState::default();
        c.source.insert("calcom".to_string());
        assert_eq!(b.fingerprint(), c.fingerprint());
    }

    #[tokio::test]
    async fn subscribers_see_only_effective_changes() {
        let store = FilterStore::new();
        let mut rx = store.subscribe(FilterScope::Webhooks);

        store.set_filters(FilterScope::Webhooks, &FilterPatch::default());
        assert!(!rx.has_changed().unwrap());

        store.set_filters(FilterScope::Webhooks, &patch_sources(&["typeform"]));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().source.contains("typeform"));
    }

    #[test]
    fn validation_rejects_unknown_tags_and_inverted_ranges() {
        let current = FilterState::default();
        assert!(patch_sources(&["calcom"])
            .validate(FilterScope::Webhooks, &current)
            .is_ok());
        assert!(patch_sources(&["manual"])
            .validate(FilterScope::Webhooks, &current)
            .is_err());
        assert!(patch_sources(&["manual"])
            .validate(FilterScope::Leads, &current)
            .is_ok());

        let inverted: FilterPatch = serde_json::from_str(
            r#"{"dateFrom":"2024-05-02T00:00:00Z","dateTo":"2024-05-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(inverted.validate(FilterScope::Webhooks, &current).is_err());
    }
}
