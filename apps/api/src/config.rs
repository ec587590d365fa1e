use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::llm_client::ProviderConfig;

/// Application configuration loaded from environment variables.
/// Built once in `main` and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// `None` when no usable provider resolves; generation then answers 501.
    pub provider: Option<ProviderConfig>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Enables the audit log (full provider exchanges and refusals).
    pub ai_debug: bool,
    pub ai_log_path: PathBuf,
    /// Maximum duration of one generation stream.
    pub generation_timeout: Duration,
    pub skills_path: Option<PathBuf>,
    pub projects_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            rust_log: "info".to_string(),
            provider: None,
            max_tokens: 1024,
            temperature: 0.7,
            ai_debug: false,
            ai_log_path: PathBuf::from("logs/ai-debug.log"),
            generation_timeout: Duration::from_secs(120),
            skills_path: None,
            projects_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        Ok(Config {
            port: parse_or(&get, "PORT", defaults.port)?,
            rust_log: get("RUST_LOG").unwrap_or(defaults.rust_log),
            provider: ProviderConfig::resolve(&lookup),
            max_tokens: parse_or(&get, "AI_MAX_TOKENS", defaults.max_tokens)?,
            temperature: parse_or(&get, "AI_TEMPERATURE", defaults.temperature)?,
            ai_debug: get("AI_DEBUG").map(|v| is_truthy(&v)).unwrap_or(false),
            ai_log_path: get("AI_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ai_log_path),
            generation_timeout: Duration::from_secs(parse_or(
                &get,
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout.as_secs(),
            )?),
            skills_path: get("SKILLS_PATH").map(PathBuf::from),
            projects_path: get("PROJECTS_PATH").map(PathBuf::from),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
