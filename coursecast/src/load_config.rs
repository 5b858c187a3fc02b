/// `load_config` module: turns the optional YAML file plus environment into a [`CliConfig`].
///
/// This is the only place where user-supplied configuration is parsed.
///
/// # Sources, highest priority first
/// - Environment (`BOT_TOKEN`, `TARGET_CHAT_ID`, `BOT_API_URL`), with `.env` loaded by `main`
/// - The YAML file given with `--config`
/// - Built-in defaults; every key is optional
///
/// The bot token is never read from YAML so config files can be committed.
///
/// # Errors
/// Unreadable or malformed files are reported through `anyhow` with the path attached.
use anyhow::{Context, Result};
use coursecast_core::{PipelineConfig, RetryPolicy};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";
pub const DEFAULT_STATE_DIR: &str = "session";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub bot_token: Option<String>,
    pub api_base_url: String,
    pub chat_id: Option<String>,
    /// Holds one progress ledger per course.
    pub state_dir: PathBuf,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    api_base_url: Option<String>,
    chat_id: Option<String>,
    state_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    max_unit_size: Option<u64>,
    max_attempts: Option<u32>,
    retry_delay_secs: Option<u64>,
    flood_wait_buffer_secs: Option<u64>,
    video_timeout_mins: Option<u64>,
    document_timeout_mins: Option<u64>,
    logo: Option<String>,
}

/// Loads `path` if given, then applies environment overrides and defaults.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let raw = match path {
        Some(path) => read_yaml(path)?,
        None => {
            info!("No config file given, using defaults");
            RawConfig::default()
        }
    };

    let state_dir = raw.state_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
    let work_dir = raw.work_dir.unwrap_or_else(|| state_dir.join("work"));

    let defaults = RetryPolicy::default();
    let retry = RetryPolicy {
        max_attempts: raw.max_attempts.unwrap_or(defaults.max_attempts),
        retry_delay: raw
            .retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_delay),
        flood_wait_buffer: raw
            .flood_wait_buffer_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.flood_wait_buffer),
        video_timeout: raw
            .video_timeout_mins
            .map(|m| Duration::from_secs(m * 60))
            .unwrap_or(defaults.video_timeout),
        document_timeout: raw
            .document_timeout_mins
            .map(|m| Duration::from_secs(m * 60))
            .unwrap_or(defaults.document_timeout),
    };

    let pipeline = PipelineConfig {
        work_dir,
        max_unit_size: raw.max_unit_size.unwrap_or(PipelineConfig::default().max_unit_size),
        retry,
        logo: raw.logo.filter(|l| !l.trim().is_empty()),
    };
    if pipeline.max_unit_size == 0 {
        anyhow::bail!("max_unit_size must be greater than zero");
    }

    let config = CliConfig {
        bot_token: env_var("BOT_TOKEN"),
        api_base_url: env_var("BOT_API_URL")
            .or(raw.api_base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
        chat_id: env_var("TARGET_CHAT_ID").or(raw.chat_id),
        state_dir,
        pipeline,
    };
    info!(
        api_base_url = %config.api_base_url,
        token_set = config.bot_token.is_some(),
        chat_id = ?config.chat_id,
        state_dir = %config.state_dir.display(),
        "Configuration resolved"
    );
    config.pipeline.trace_loaded();
    Ok(config)
}

fn read_yaml(path: &Path) -> Result<RawConfig> {
    info!(config_path = ?path, "Loading configuration from file");
    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to read config file");
        e
    });
    let content = content.with_context(|| format!("Failed to read config file {}", path.display()))?;

    // An empty file is a valid "all defaults" config.
    if content.trim().is_empty() {
        return Ok(RawConfig::default());
    }
    serde_yaml::from_str(&content)
        .map_err(|e| {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            e
        })
        .with_context(|| format!("Failed to parse config YAML {}", path.display()))
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
