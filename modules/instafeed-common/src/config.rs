use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::types::MissingMetrics;

/// Application configuration loaded from environment variables.
/// Read once at start; the core only ever sees it by reference.
#[derive(Debug, Clone)]
pub struct Config {
    // Apify
    pub apify_token: Option<String>,
    pub apify_base_url: String,
    pub apify_actor_id: String,
    pub apify_run_timeout_secs: u64,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub job_deadline: Duration,

    // Instagram
    pub username: String,
    pub max_posts: u32,

    // Cache
    pub cache_enabled: bool,
    pub cache_duration: Duration,
    pub cache_key_prefix: String,

    // Fallback / demo mode
    pub use_fallback: bool,
    pub fallback_latency: Duration,
    pub missing_metrics: MissingMetrics,
    pub metrics_seed: Option<u64>,

    // Front end
    pub posts_per_section: usize,
    /// `None` disables periodic refresh.
    pub auto_refresh: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        let poll_interval = Duration::from_secs(5);
        let poll_max_attempts = 60;
        Self {
            apify_token: None,
            apify_base_url: "https://api.apify.com/v2".to_string(),
            apify_actor_id: "apify/instagram-scraper".to_string(),
            apify_run_timeout_secs: 300,
            poll_interval,
            poll_max_attempts,
            job_deadline: default_deadline(poll_interval, poll_max_attempts),
            username: "ramcharala".to_string(),
            max_posts: 50,
            cache_enabled: true,
            cache_duration: Duration::from_secs(600),
            cache_key_prefix: "insta_feed_".to_string(),
            use_fallback: true,
            fallback_latency: Duration::from_millis(1000),
            missing_metrics: MissingMetrics::Synthesize,
            metrics_seed: None,
            posts_per_section: 8,
            auto_refresh: Some(Duration::from_secs(300)),
        }
    }
}

/// Attempt budget plus a minute of slack for submit and retrieve.
fn default_deadline(interval: Duration, attempts: u32) -> Duration {
    interval * attempts + Duration::from_secs(60)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.log_keys();
        Ok(config)
    }

    /// Build from any key → value source. Unset or blank keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let poll_interval = Duration::from_secs(parsed(&get, "APIFY_POLL_INTERVAL_SECS", 5)?);
        let poll_max_attempts = parsed(&get, "APIFY_POLL_MAX_ATTEMPTS", defaults.poll_max_attempts)?;
        let job_deadline = match get("APIFY_DEADLINE_SECS") {
            Some(_) => Duration::from_secs(parsed(&get, "APIFY_DEADLINE_SECS", 0)?),
            None => default_deadline(poll_interval, poll_max_attempts),
        };

        let apify_token = get("APIFY_TOKEN");
        let mut use_fallback = flag(&get, "USE_FALLBACK", defaults.use_fallback)?;
        if apify_token.is_none() && !use_fallback {
            tracing::warn!("APIFY_TOKEN not set, forcing fallback data");
            use_fallback = true;
        }

        let auto_refresh_secs: u64 = parsed(&get, "AUTO_REFRESH_SECS", 300)?;

        Ok(Self {
            apify_token,
            apify_base_url: get("APIFY_BASE_URL").unwrap_or(defaults.apify_base_url),
            apify_actor_id: get("APIFY_ACTOR_ID").unwrap_or(defaults.apify_actor_id),
            apify_run_timeout_secs: parsed(
                &get,
                "APIFY_RUN_TIMEOUT_SECS",
                defaults.apify_run_timeout_secs,
            )?,
            poll_interval,
            poll_max_attempts,
            job_deadline,
            username: get("INSTAGRAM_USERNAME").unwrap_or(defaults.username),
            max_posts: parsed(&get, "INSTAGRAM_MAX_POSTS", defaults.max_posts)?,
            cache_enabled: flag(&get, "CACHE_ENABLED", defaults.cache_enabled)?,
            cache_duration: Duration::from_secs(parsed(&get, "CACHE_DURATION_SECS", 600)?),
            cache_key_prefix: get("CACHE_KEY_PREFIX").unwrap_or(defaults.cache_key_prefix),
            use_fallback,
            fallback_latency: Duration::from_millis(parsed(&get, "FALLBACK_LATENCY_MS", 1000)?),
            missing_metrics: parsed(&get, "MISSING_METRICS", defaults.missing_metrics)?,
            metrics_seed: get("METRICS_SEED")
                .map(|raw| {
                    raw.trim()
                        .parse()
                        .map_err(|e| anyhow!("METRICS_SEED is invalid ({raw}): {e}"))
                })
                .transpose()?,
            posts_per_section: parsed(&get, "POSTS_PER_SECTION", defaults.posts_per_section)?,
            auto_refresh: (auto_refresh_secs > 0).then(|| Duration::from_secs(auto_refresh_secs)),
        })
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(5).collect();
            format!("{}...({} chars)", head, val.len())
        }

        tracing::info!("Config loaded:");
        tracing::info!(
            "  APIFY_TOKEN: {}",
            self.apify_token
                .as_deref()
                .map(preview)
                .unwrap_or_else(|| "<not set>".to_string())
        );
        tracing::info!("  APIFY_ACTOR_ID: {}", self.apify_actor_id);
        tracing::info!("  INSTAGRAM_USERNAME: {}", self.username);
        tracing::info!(
            "  CACHE: enabled={} duration={}s",
            self.cache_enabled,
            self.cache_duration.as_secs()
        );
        tracing::info!("  USE_FALLBACK: {}", self.use_fallback);
    }
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key} is invalid ({raw}): {e}")),
        None => Ok(default),
    }
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("{key} must be true or false, got '{v}'")),
        },
        None => Ok(default),
    }
}
