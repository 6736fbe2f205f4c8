use serde::Deserialize;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub upstream: UpstreamSettings,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub api_token: Option<String>,
}

/// Query engine tuning. Poll intervals must stay above `stale_time_ms`
/// or every tick would find a fresh entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    pub stale_time_ms: u64,
    pub cache_time_secs: u64,
    pub webhook_poll_secs: u64,
    pub summary_poll_secs: u64,
    pub webhook_page_size: u32,
    pub lead_page_size: u32,
    pub recent_webhooks_limit: u32,
    pub view_idle_timeout_secs: u64,
    pub maintenance_interval_secs: u64,
}

impl EngineSettings {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn cache_time(&self) -> Duration {
        Duration::from_secs(self.cache_time_secs)
    }

    pub fn view_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.view_idle_timeout_secs)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stale_time_ms: 2_000,
            cache_time_secs: 300,
            webhook_poll_secs: 5,
            summary_poll_secs: 10,
            webhook_page_size: 20,
            lead_page_size: 10,
            recent_webhooks_limit: 10,
            view_idle_timeout_secs: 1_800,
            maintenance_interval_secs: 60,
        }
    }
}

/// Flat view of the environment, one field per variable name
#[derive(Debug, Deserialize)]
struct EnvSettings {
    server_host: String,
    server_port: u16,
    cors_allowed_origins: String,
    upstream_base_url: String,
    upstream_timeout_secs: u64,
    api_token: Option<String>,
    stale_time_ms: u64,
    cache_time_secs: u64,
    webhook_poll_secs: u64,
    summary_poll_secs: u64,
    webhook_page_size: u32,
    lead_page_size: u32,
    recent_webhooks_limit: u32,
    view_idle_timeout_secs: u64,
    maintenance_interval_secs: u64,
}

impl Settings {
    /// Load configuration from environment variables, falling back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let engine = EngineSettings::default();

        let env: EnvSettings = config::Config::builder()
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8090)?
            .set_default("cors_allowed_origins", "*")?
            .set_default("upstream_base_url", "http://localhost:3000/api")?
            .set_default("upstream_timeout_secs", 15)?
            .set_default("stale_time_ms", engine.stale_time_ms)?
            .set_default("cache_time_secs", engine.cache_time_secs)?
            .set_default("webhook_poll_secs", engine.webhook_poll_secs)?
            .set_default("summary_poll_secs", engine.summary_poll_secs)?
            .set_default("webhook_page_size", engine.webhook_page_size)?
            .set_default("lead_page_size", engine.lead_page_size)?
            .set_default("recent_webhooks_limit", engine.recent_webhooks_limit)?
            .set_default("view_idle_timeout_secs", engine.view_idle_timeout_secs)?
            .set_default("maintenance_interval_secs", engine.maintenance_interval_secs)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;

        let settings = Settings {
            server: ServerSettings {
                host: env.server_host,
                port: env.server_port,
                cors_allowed_origins: env.cors_allowed_origins,
            },
            upstream: UpstreamSettings {
                base_url: env.upstream_base_url.trim_end_matches('/').to_string(),
                timeout_secs: env.upstream_timeout_secs,
                api_token: env.api_token.filter(|t| !t.is_empty()),
            },
            engine: EngineSettings {
                stale_time_ms: env.stale_time_ms,
                cache_time_secs: env.cache_time_secs,
                webhook_poll_secs: env.webhook_poll_secs.max(1),
                summary_poll_secs: env.summary_poll_secs.max(1),
                webhook_page_size: env.webhook_page_size.max(1),
                lead_page_size: env.lead_page_size.max(1),
                recent_webhooks_limit: env.recent_webhooks_limit.max(1),
                view_idle_timeout_secs: env.view_idle_timeout_secs,
                maintenance_interval_secs: env.maintenance_interval_secs.max(1),
            },
        };

        Ok(settings)
    }
}
