use crate::error::{AppError, AppResult};
use crate::filters::{FilterPatch, FilterScope};
use crate::models::{
    CopyFieldRequest, CopyFieldResponse, HealthResponse, LeadInput, MountViewRequest,
    MountViewResponse, PageRequest, PageResponse, RefreshResponse, SelectEventRequest,
    SortRequest,
};
use crate::sse::SseStream;
use crate::AppState;
use actix_web::{web, HttpResponse};
use tracing::{info, instrument};
use uuid::Uuid;

/// Validate view id format
fn parse_view_id(view_id: &str) -> AppResult<Uuid> {
    Uuid::parse_str(view_id)
        .map_err(|_| AppError::Validation(format!("'{}' is not a valid view id", view_id)))
}

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health_check_handler(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        mounted_views: state.views.count().await,
        bus_subscribers: state.ctx.bus.subscriber_count(),
        cache_entries: state.ctx.coordinator.entry_count(),
    };

    Ok(HttpResponse::Ok().json(response))
}

/// Mount a view and return its first snapshot
#[instrument(skip(state))]
pub async fn mount_view_handler(
    body: web::Json<MountViewRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let view = state.views.mount(body.kind, state.ctx.clone()).await;

    Ok(HttpResponse::Created().json(MountViewResponse {
        view_id: view.id().to_string(),
        snapshot: view.snapshot(),
    }))
}

#[instrument(skip(state))]
pub async fn get_view_handler(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let view = state.views.get(&parse_view_id(&path)?).await?;
    Ok(HttpResponse::Ok().json(view.snapshot()))
}

#[instrument(skip(state))]
pub async fn unmount_view_handler(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    state.views.unmount(&parse_view_id(&path)?).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Stream snapshots and notifications of a view via SSE
#[instrument(skip(state))]
pub async fn stream_view_handler(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let view = state.views.get(&parse_view_id(&path)?).await?;

    info!(view_id = %view.id(), "Client connected to SSE stream");
    let sse_stream = SseStream::new(
        view.id(),
        view.subscribe_snapshots(),
        view.subscribe_notifications(),
        view.lifetime(),
    );

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache, no-transform"))
        .insert_header(("X-Accel-Buffering", "no")) // Disable nginx buffering
        .streaming(sse_stream))
}

/// Column header click
#[instrument(skip(state))]
pub async fn sort_view_handler(
    path: web::Path<String>,
    body: web::Json<SortRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let view = state.views.get(&parse_view_id(&path)?).await?;
    view.toggle_sort(&body.column)?;
    Ok(HttpResponse::Ok().json(view.snapshot()))
}

/// Pagination control; out-of-range pages are reported as not applied
#[instrument(skip(state))]
pub async fn page_view_handler(
    path: web::Path<String>,
    body: web::Json<PageRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let view = state.views.get(&parse_view_id(&path)?).await?;
    let applied = view.set_page(body.page);
    Ok(HttpResponse::Ok().json(PageResponse {
        applied,
        snapshot: view.snapshot(),
    }))
}

#[instrument(skip(state))]
pub async fn refresh_view_handler(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let view = state.views.get(&parse_view_id(&path)?).await?;
    view.refresh();
    Ok(HttpResponse::Accepted().json(view.snapshot()))
}

#[instrument(skip(state))]
pub async fn select_event_handler(
    path: web::Path<String>,
    body: web::Json<SelectEventRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let view = state.views.get(&parse_view_id(&path)?).await?;
    view.select_event(&body.event_id)?;
    Ok(HttpResponse::Ok().json(view.snapshot()))
}

#[instrument(skip(state))]
pub async fn close_inspector_handler(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let view = state.views.get(&parse_view_id(&path)?).await?;
    view.close_inspector();
    Ok(HttpResponse::Ok().json(view.snapshot()))
}

/// Copy a field of the inspected event; the outcome is a notification either way
#[instrument(skip(state))]
pub async fn copy_field_handler(
    path: web::Path<String>,
    body: web::Json<CopyFieldRequest>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let view = state.views.get(&parse_view_id(&path)?).await?;
    let notification = view.copy_field(body.field);
    Ok(HttpResponse::Ok().json(CopyFieldResponse {
        notification,
        text: view.field_text(body.field),
    }))
}

#[instrument(skip(state))]
pub async fn get_filters_handler(
    path: web::Path<FilterScope>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.ctx.filters.get_filters(*path)))
}

/// Merge a partial update into a scope's filters
#[instrument(skip(state))]
pub async fn patch_filters_handler(
    path: web::Path<FilterScope>,
    body: web::Json<FilterPatch>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let scope = *path;
    let filters = &state.ctx.filters;
    body.validate(scope, &filters.get_filters(scope))
        .map_err(AppError::Validation)?;

    let updated = filters.set_filters(scope, &body);
    info!(scope = %scope, filters = %updated.fingerprint(), "Filters updated");
    Ok(HttpResponse::Ok().json(updated))
}

#[instrument(skip(state))]
pub async fn reset_filters_handler(
    path: web::Path<FilterScope>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let scope = *path;
    let reset = state.ctx.filters.reset_filters(scope);
    info!(scope = %scope, "Filters reset");
    Ok(HttpResponse::Ok().json(reset))
}

/// Broadcast `refresh-data` to every mounted view
#[instrument(skip(state))]
pub async fn publish_refresh_handler(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let subscribers = state.ctx.bus.publish();
    info!(subscribers = subscribers, "refresh-data published");
    Ok(HttpResponse::Accepted().json(RefreshResponse { subscribers }))
}

#[instrument(skip(state, body))]
pub async fn create_lead_handler(
    body: web::Json<LeadInput>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let lead = state.leads.create_lead(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(lead))
}

#[instrument(skip(state, body))]
pub async fn update_lead_handler(
    path: web::Path<String>,
    body: web::Json<LeadInput>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let lead = state.leads.update_lead(&path, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(lead))
}
