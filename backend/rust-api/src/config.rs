use serde::Deserialize;
use std::{env, fmt::Display, str::FromStr};

use crate::models::profile::DEFAULT_HISTORY_LIMIT;
use crate::services::question_generator::DEFAULT_RETRY_BUDGET;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    /// No URI means snapshots live in process memory.
    pub redis_uri: Option<String>,
    pub snapshot_ttl_seconds: u64,
    pub profile_history_limit: usize,
    pub generation_retry_budget: u32,
    pub ai_feedback_url: Option<String>,
    pub ai_feedback_timeout_ms: u64,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            redis_uri: None,
            snapshot_ttl_seconds: 86_400,
            profile_history_limit: DEFAULT_HISTORY_LIMIT,
            generation_retry_budget: DEFAULT_RETRY_BUDGET,
            ai_feedback_url: None,
            ai_feedback_timeout_ms: 2_000,
            log_format: LogFormat::Json,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, local .env as fallback
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml overlaid with APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Self::from_settings(&settings)
    }

    fn from_settings(settings: &config::Config) -> Result<Self, config::ConfigError> {
        let defaults = Config::default();

        let bind_addr = lookup(settings, "server.bind_addr", "BIND_ADDR")
            .unwrap_or(defaults.bind_addr);

        let redis_uri = lookup(settings, "redis.uri", "REDIS_URI").filter(|uri| !uri.is_empty());

        let snapshot_ttl_seconds = parsed(
            settings,
            "redis.snapshot_ttl_seconds",
            "SNAPSHOT_TTL_SECONDS",
            defaults.snapshot_ttl_seconds,
        )?;

        let profile_history_limit = parsed(
            settings,
            "lesson.profile_history_limit",
            "PROFILE_HISTORY_LIMIT",
            defaults.profile_history_limit,
        )?;

        let generation_retry_budget = parsed(
            settings,
            "lesson.generation_retry_budget",
            "GENERATION_RETRY_BUDGET",
            defaults.generation_retry_budget,
        )?;

        let ai_feedback_url =
            lookup(settings, "ai_feedback.url", "AI_FEEDBACK_URL").filter(|url| !url.is_empty());

        let ai_feedback_timeout_ms = parsed(
            settings,
            "ai_feedback.timeout_ms",
            "AI_FEEDBACK_TIMEOUT_MS",
            defaults.ai_feedback_timeout_ms,
        )?;

        let log_format = parsed(settings, "logging.format", "LOG_FORMAT", defaults.log_format)?;

        if ai_feedback_url.is_none() {
            tracing::debug!("AI_FEEDBACK_URL not set, feedback uses templates only");
        }

        Ok(Config {
            bind_addr,
            redis_uri,
            snapshot_ttl_seconds,
            profile_history_limit,
            generation_retry_budget,
            ai_feedback_url,
            ai_feedback_timeout_ms,
            log_format,
        })
    }

    pub fn ai_feedback_enabled(&self) -> bool {
        self.ai_feedback_url.is_some()
    }
}

fn lookup(settings: &config::Config, key: &str, env_var: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| env::var(env_var).ok())
}

fn parsed<T>(
    settings: &config::Config,
    key: &str,
    env_var: &str,
    default: T,
) -> Result<T, config::ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(settings, key, env_var) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            config::ConfigError::Message(format!("invalid value for {} ({}): {}", key, raw, e))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "BIND_ADDR",
        "REDIS_URI",
        "SNAPSHOT_TTL_SECONDS",
        "PROFILE_HISTORY_LIMIT",
        "GENERATION_RETRY_BUDGET",
        "AI_FEEDBACK_URL",
        "AI_FEEDBACK_TIMEOUT_MS",
        "LOG_FORMAT",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn empty_settings() -> config::Config {
        config::Config::builder().build().unwrap()
    }

    #[test]
    #[serial]
    fn defaults_apply_without_env() {
        clear_env();
        let config = Config::from_settings(&empty_settings()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8081");
        assert!(config.redis_uri.is_none());
        assert_eq!(config.snapshot_ttl_seconds, 86_400);
        assert_eq!(config.profile_history_limit, 50);
        assert_eq!(config.generation_retry_budget, 50);
        assert!(!config.ai_feedback_enabled());
        assert_eq!(config.ai_feedback_timeout_ms, 2_000);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn env_overrides_defaults() {
        clear_env();
        env::set_var("REDIS_URI", "redis://127.0.0.1:6379/2");
        env::set_var("GENERATION_RETRY_BUDGET", "7");
        env::set_var("AI_FEEDBACK_URL", "http://localhost:9000/feedback");
        env::set_var("LOG_FORMAT", "text");

        let config = Config::from_settings(&empty_settings()).unwrap();
        assert_eq!(config.redis_uri.as_deref(), Some("redis://127.0.0.1:6379/2"));
        assert_eq!(config.generation_retry_budget, 7);
        assert!(config.ai_feedback_enabled());
        assert_eq!(config.log_format, LogFormat::Text);
        clear_env();
    }

    #[test]
    #[serial]
    fn invalid_number_is_an_error_not_a_panic() {
        clear_env();
        env::set_var("SNAPSHOT_TTL_SECONDS", "a day");
        assert!(Config::from_settings(&empty_settings()).is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn settings_take_precedence_over_plain_env() {
        clear_env();
        env::set_var("PROFILE_HISTORY_LIMIT", "10");
        let settings = config::Config::builder()
            .set_override("lesson.profile_history_limit", 25)
            .unwrap()
            .build()
            .unwrap();
        let config = Config::from_settings(&settings).unwrap();
        assert_eq!(config.profile_history_limit, 25);
        clear_env();
    }
}
