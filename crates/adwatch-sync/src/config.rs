use std::path::PathBuf;
use std::time::Duration;

use adwatch_adapters::{AdapterLimits, DEFAULT_API_BASE_URL};
use adwatch_storage::HttpClientConfig;

/// Runtime settings, read from `ADWATCH_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub adapter_timeout_secs: u64,
    pub max_pages: usize,
    pub max_queries: usize,
    pub max_ads_per_platform: usize,
    pub stale_job_secs: u64,
    pub batch_pause_ms: u64,
    pub scheduler_enabled: bool,
    pub fetch_cron: String,
    pub estimation_table: Option<PathBuf>,
    /// Offline mode: adapters read recorded responses from here.
    pub fixtures_dir: Option<PathBuf>,
    pub competitors_file: Option<PathBuf>,
    pub web_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str, default: u64| {
            text(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        Self {
            database_url: text("DATABASE_URL"),
            api_key: text("ADWATCH_API_KEY"),
            api_base_url: text("ADWATCH_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            user_agent: text("ADWATCH_USER_AGENT")
                .unwrap_or_else(|| "adwatch-bot/0.1".to_string()),
            http_timeout_secs: number("ADWATCH_HTTP_TIMEOUT_SECS", 20),
            adapter_timeout_secs: number("ADWATCH_ADAPTER_TIMEOUT_SECS", 45),
            max_pages: number("ADWATCH_MAX_PAGES", 3) as usize,
            max_queries: number("ADWATCH_MAX_QUERIES", 3) as usize,
            max_ads_per_platform: number("ADWATCH_MAX_ADS_PER_PLATFORM", 50) as usize,
            stale_job_secs: number("ADWATCH_STALE_JOB_SECS", 900),
            batch_pause_ms: number("ADWATCH_BATCH_PAUSE_MS", 1000),
            scheduler_enabled: text("ADWATCH_SCHEDULER_ENABLED")
                .map(|v| flag(&v))
                .unwrap_or(false),
            fetch_cron: text("ADWATCH_FETCH_CRON").unwrap_or_else(|| "0 0 6,18 * * *".to_string()),
            estimation_table: text("ADWATCH_ESTIMATION_TABLE").map(PathBuf::from),
            fixtures_dir: text("ADWATCH_FIXTURES_DIR").map(PathBuf::from),
            competitors_file: text("ADWATCH_COMPETITORS").map(PathBuf::from),
            web_port: text("ADWATCH_WEB_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(8080),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..HttpClientConfig::default()
        }
    }

    pub fn adapter_limits(&self) -> AdapterLimits {
        AdapterLimits {
            max_pages: self.max_pages.max(1),
            max_queries: self.max_queries.max(1),
            max_ads: self.max_ads_per_platform.max(1),
            deadline: Duration::from_secs(self.adapter_timeout_secs.max(1)),
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_job_secs)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}
