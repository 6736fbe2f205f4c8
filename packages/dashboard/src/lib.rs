pub mod api_client;
pub mod bus;
pub mod config;
pub mod error;
pub mod filters;
pub mod handlers;
pub mod inspector;
pub mod leads;
pub mod models;
pub mod query;
pub mod sse;
pub mod table;
#[cfg(test)]
mod testing;
pub mod view;

use actix_web::{error::JsonPayloadError, web, HttpRequest};
use std::time::Instant;

use crate::error::AppError;
use crate::handlers::{
    close_inspector_handler, copy_field_handler, create_lead_handler, get_filters_handler,
    get_view_handler, health_check_handler, mount_view_handler, page_view_handler,
    patch_filters_handler, publish_refresh_handler, refresh_view_handler, reset_filters_handler,
    select_event_handler, sort_view_handler, stream_view_handler, unmount_view_handler,
    update_lead_handler,
};
use crate::leads::LeadService;
use crate::view::{ViewContext, ViewRegistry};

/// Application state shared across all handlers
pub struct AppState {
    pub ctx: ViewContext,
    pub views: ViewRegistry,
    pub leads: LeadService,
    pub started_at: Instant,
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::Validation(err.to_string()).into()
}

/// Route table of the dashboard API
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .route("/health", web::get().to(health_check_handler))
        .route("/api/views", web::post().to(mount_view_handler))
        .service(
            web::resource("/api/views/{view_id}")
                .route(web::get().to(get_view_handler))
                .route(web::delete().to(unmount_view_handler)),
        )
        .route("/api/views/{view_id}/stream", web::get().to(stream_view_handler))
        .route("/api/views/{view_id}/sort", web::post().to(sort_view_handler))
        .route("/api/views/{view_id}/page", web::post().to(page_view_handler))
        .route("/api/views/{view_id}/refresh", web::post().to(refresh_view_handler))
        .service(
            web::resource("/api/views/{view_id}/inspector")
                .route(web::post().to(select_event_handler))
                .route(web::delete().to(close_inspector_handler)),
        )
        .route(
            "/api/views/{view_id}/inspector/copy",
            web::post().to(copy_field_handler),
        )
        .service(
            web::resource("/api/filters/{scope}")
                .route(web::get().to(get_filters_handler))
                .route(web::patch().to(patch_filters_handler))
                .route(web::delete().to(reset_filters_handler)),
        )
        .route("/api/refresh", web::post().to(publish_refresh_handler))
        .route("/api/leads", web::post().to(create_lead_handler))
        .route("/api/leads/{lead_id}", web::put().to(update_lead_handler));
}

