use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_actix_web::TracingLogger;

use dashboard::api_client::ApiClient;
use dashboard::bus::RefreshBus;
use dashboard::config::Settings;
use dashboard::filters::FilterStore;
use dashboard::inspector::SystemClipboard;
use dashboard::leads::LeadService;
use dashboard::query::QueryCoordinator;
use dashboard::view::{ViewContext, ViewRegistry};
use dashboard::{configure_routes, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if exists)
    dotenvy::dotenv().ok();

    init_tracing();

    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load settings: {}", e);
        e
    })?;

    info!(
        server_host = %settings.server.host,
        server_port = %settings.server.port,
        upstream = %settings.upstream.base_url,
        "Starting lead-intake dashboard"
    );

    let api = Arc::new(ApiClient::from_settings(&settings.upstream)?);
    let engine = settings.engine.clone();
    let coordinator = QueryCoordinator::new(api.clone(), engine.stale_time());

    let ctx = ViewContext {
        coordinator: coordinator.clone(),
        filters: FilterStore::new(),
        bus: RefreshBus::new(),
        clipboard: Arc::new(SystemClipboard),
        engine: engine.clone(),
    };
    let views = ViewRegistry::new();

    let app_state = web::Data::new(AppState {
        ctx,
        views: views.clone(),
        leads: LeadService::new(api, coordinator.clone()),
        started_at: Instant::now(),
    });

    // Background maintenance: idle cache entries and abandoned views
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(engine.maintenance_interval_secs));

        loop {
            interval.tick().await;

            let unmounted = views.cleanup_idle(engine.view_idle_timeout()).await;
            let collected = coordinator.collect_garbage(engine.cache_time());
            let mounted = views.count().await;
            debug!(
                unmounted_views = unmounted,
                collected_entries = collected,
                mounted_views = mounted,
                cache_entries = coordinator.entry_count(),
                "Maintenance completed"
            );
        }
    });

    let server_host = settings.server.host.clone();
    let server_port = settings.server.port;
    let cors_origins = settings.server.cors_allowed_origins.clone();

    info!("Binding to {}:{}", server_host, server_port);

    HttpServer::new(move || {
        let cors = build_cors(&cors_origins);

        App::new()
            .app_data(app_state.clone())
            .wrap(TracingLogger::default())
            .wrap(cors)
            .configure(configure_routes)
    })
    .bind((server_host.as_str(), server_port))
    .map_err(|e| {
        eprintln!("Failed to bind to {}:{}: {}", server_host, server_port, e);
        anyhow::anyhow!("Failed to bind server: {}", e)
    })?
    .workers(num_cpus::get())
    .shutdown_timeout(30)
    .run()
    .await
    .map_err(|e| {
        eprintln!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    info!("Server shutting down");
    Ok(())
}

/// Initialize tracing/logging subscriber. `LOG_FORMAT=json` switches to
/// structured JSON lines.
fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Build CORS configuration
fn build_cors(allowed_origins: &str) -> Cors {
    if allowed_origins == "*" {
        Cors::permissive()
    } else {
        let origins: Vec<&str> = allowed_origins.split(',').map(|s| s.trim()).collect();
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::CONTENT_TYPE,
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
            ])
            .max_age(3600);

        for origin in origins {
            cors = cors.allowed_origin(origin);
        }

        cors
    }
}
