use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub checkers: CheckersConfig,
    pub rate_limit: RateLimitConfig,
    pub batch: BatchConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_checker_timeout_ms")]
    pub checker_timeout_ms: u64,
    /// Sources whose errors callers treat as a rejection
    #[serde(default)]
    pub fail_closed_sources: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckersConfig {
    pub internal_dnc: InternalDncConfig,
    pub external_blacklist: ExternalBlacklistConfig,
    pub litigation_scrub: LitigationScrubConfig,
    pub tcpa: TcpaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InternalDncConfig {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExternalBlacklistConfig {
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_blocked_code")]
    pub blocked_code: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LitigationScrubConfig {
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TcpaConfig {
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub calling_window: Option<CallingWindowConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CallingWindowConfig {
    #[serde(default = "default_window_start")]
    pub start_hour: u32,
    #[serde(default = "default_window_end")]
    pub end_hour: u32,
    #[serde(default)]
    pub utc_offset_hours: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub inbound: WindowConfig,
    pub outbound: OutboundWindowConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowConfig {
    pub limit: u32,
    pub window_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutboundWindowConfig {
    pub limit: u32,
    pub window_secs: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotificationsConfig {
    pub webhook_url: Option<String>,
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_ids: Vec<i64>,
}

fn default_checker_timeout_ms() -> u64 {
    5000
}

fn default_blocked_code() -> String {
    "internal_dnc".to_string()
}

fn default_window_start() -> u32 {
    8
}

fn default_window_end() -> u32 {
    21
}

fn default_max_wait_ms() -> u64 {
    2000
}

fn default_concurrency() -> usize {
    4
}

fn default_max_items() -> usize {
    10_000
}

impl Config {
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("LEADCOMP").separator("__"))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.checker_timeout_ms == 0 {
            anyhow::bail!("engine.checker_timeout_ms must be greater than zero");
        }
        if self.batch.concurrency == 0 {
            anyhow::bail!("batch.concurrency must be greater than zero");
        }
        if self.rate_limit.inbound.limit == 0 || self.rate_limit.outbound.limit == 0 {
            anyhow::bail!("rate limits must be greater than zero");
        }
        if self.rate_limit.inbound.window_secs == 0 || self.rate_limit.outbound.window_secs == 0 {
            anyhow::bail!("rate limit windows must be greater than zero");
        }

        let checkers = &self.checkers;
        if checkers.external_blacklist.enabled && checkers.external_blacklist.url.is_empty() {
            anyhow::bail!("checkers.external_blacklist.url is required when enabled");
        }
        if checkers.litigation_scrub.enabled
            && (checkers.litigation_scrub.base_url.is_empty() || checkers.litigation_scrub.api_key.is_empty())
        {
            anyhow::bail!("checkers.litigation_scrub needs base_url and api_key when enabled");
        }
        if checkers.tcpa.enabled && checkers.tcpa.base_url.is_empty() {
            anyhow::bail!("checkers.tcpa.base_url is required when enabled");
        }
        if let Some(window) = &checkers.tcpa.calling_window {
            if window.start_hour >= window.end_hour || window.end_hour > 24 {
                anyhow::bail!("checkers.tcpa.calling_window must satisfy start_hour < end_hour <= 24");
            }
        }

        Ok(())
    }

    pub fn checker_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.checker_timeout_ms)
    }
}
