use crate::models::Pagination;
use crate::query::{Resource, SortOrder};
use serde::Serialize;

const WEBHOOK_COLUMNS: &[&str] = &["received_at", "source", "status", "endpoint", "response_code"];
const LEAD_COLUMNS: &[&str] = &["created_at", "updated_at", "name", "email", "status", "source"];

/// Columns the upstream API can sort `resource` by
pub fn sortable_columns(resource: Resource) -> &'static [&'static str] {
    match resource {
        Resource::Webhooks => WEBHOOK_COLUMNS,
        Resource::Leads => LEAD_COLUMNS,
        _ => &[],
    }
}

/// Newest first for both listings
pub fn default_sort(resource: Resource) -> Option<SortState> {
    match resource {
        Resource::Webhooks => Some(SortState::descending("received_at")),
        Resource::Leads => Some(SortState::descending("created_at")),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SortState {
    pub sort_by: String,
    pub sort_order: SortOrder,
}

impl SortState {
    pub fn descending(column: &str) -> Self {
        Self {
            sort_by: column.to_string(),
            sort_order: SortOrder::Desc,
        }
    }

    /// Header click: flip the order on the active column, otherwise switch
    /// to `column` newest/largest first.
    pub fn toggle(&mut self, column: &str) {
        if self.sort_by == column {
            self.sort_order = self.sort_order.toggled();
        } else {
            *self = SortState::descending(column);
        }
    }
}

/// Validate a requested page against the last known page count.
///
/// Returns `None` for anything outside `[1, max(1, total_pages)]`; the
/// controls for such pages are disabled, so this is a no-op rather than an
/// error. Without a known page count only page 1 is reachable.
pub fn clamp_page(requested: i64, total_pages: Option<u32>) -> Option<u32> {
    let last = i64::from(total_pages.unwrap_or(1).max(1));
    if (1..=last).contains(&requested) {
        u32::try_from(requested).ok()
    } else {
        None
    }
}

/// What the pagination bar renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationControls {
    pub page: u32,
    pub total_pages: u32,
    pub total_count: u64,
    pub page_size: u32,
    /// 1-based index of the first row shown, 0 when the page is empty
    pub first_row: u64,
    pub last_row: u64,
    pub has_previous: bool,
    pub has_next: bool,
}

impl PaginationControls {
    pub fn new(pagination: Pagination, page_size: u32, rows_on_page: usize) -> Self {
        let rows = rows_on_page as u64;
        let (first_row, last_row) = if rows == 0 {
            (0, 0)
        } else {
            let first = u64::from(pagination.page.saturating_sub(1)) * u64::from(page_size) + 1;
            (first, first + rows - 1)
        };

        Self {
            page: pagination.page,
            total_pages: pagination.total_pages,
            total_count: pagination.total_count,
            page_size,
            first_row,
            last_row,
            has_previous: pagination.page > 1,
            has_next: pagination.page < pagination.total_pages,
        }
    }
}
