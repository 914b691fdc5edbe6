use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::error::QqsumError;

pub const API_KEY_PLACEHOLDER: &str = "YOUR_GEMINI_API_KEY_HERE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            access_token: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub group_id: i64,
    pub lookback_hours: u64,
    pub max_pages: u32,
    pub max_messages: usize,
    pub page_size: u32,
    pub delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            group_id: 0,
            lookback_hours: 24,
            max_pages: 20,
            max_messages: 1500,
            page_size: 100,
            delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub download_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout_secs: 300,
        }
    }
}

impl GeminiConfig {
    pub fn has_usable_key(&self) -> bool {
        let key = self.api_key.trim();
        !key.is_empty() && !key.contains(API_KEY_PLACEHOLDER)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptConfig {
    /// File holding a replacement instruction prefix; `{hours}` is substituted.
    pub template_path: Option<String>,
    /// IANA timezone used for `HH:MM:SS` stamps, local time when unset.
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QqsumConfig {
    pub gateway: GatewayConfig,
    pub fetch: FetchConfig,
    pub media: MediaConfig,
    pub gemini: GeminiConfig,
    pub prompt: PromptConfig,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_i64(var: &str, fallback: i64) -> i64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<i64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_optional(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

fn env_first(vars: &[&str], fallback: &str) -> String {
    for var in vars {
        if let Ok(v) = env::var(var) {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    fallback.to_string()
}

impl QqsumConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gateway.base_url.trim().is_empty() {
            return Err(anyhow!("invalid gateway url: cannot be empty"));
        }
        if self.gateway.timeout_secs == 0 {
            return Err(anyhow!("invalid request timeout: must be >= 1 second"));
        }
        if self.fetch.lookback_hours == 0 {
            return Err(anyhow!("invalid lookback hours: must be >= 1"));
        }
        if self.fetch.max_pages == 0 {
            return Err(anyhow!("invalid page budget: must be >= 1"));
        }
        if self.fetch.max_messages == 0 {
            return Err(anyhow!("invalid message budget: must be >= 1"));
        }
        if self.fetch.page_size == 0 {
            return Err(anyhow!("invalid page size: must be >= 1"));
        }
        if self.media.download_timeout_secs == 0 {
            return Err(anyhow!("invalid image download timeout: must be >= 1 second"));
        }
        if self.gemini.timeout_secs == 0 {
            return Err(anyhow!("invalid gemini timeout: must be >= 1 second"));
        }
        if self.gemini.model.trim().is_empty() {
            return Err(anyhow!("invalid gemini model: cannot be empty"));
        }
        if let Some(tz) = self.prompt.timezone.as_deref() {
            tz.parse::<chrono_tz::Tz>()
                .map_err(|_| anyhow!("invalid timezone `{tz}`: use an IANA name"))?;
        }
        Ok(())
    }

    pub fn require_group(&self) -> std::result::Result<i64, QqsumError> {
        if self.fetch.group_id <= 0 {
            return Err(QqsumError::configuration(
                "target group id is not set; use --group or QQSUM_GROUP_ID",
            ));
        }
        Ok(self.fetch.group_id)
    }
}

fn merge_file_config(path: &Path) -> Result<QqsumConfig> {
    if !path.exists() {
        return Ok(QqsumConfig::default());
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse qqsum config {}: {err}", path.display()))
}

fn apply_env(cfg: &mut QqsumConfig) {
    cfg.gateway.base_url = env_or_string("QQSUM_GATEWAY_URL", &cfg.gateway.base_url);
    cfg.gateway.access_token =
        env_or_optional("QQSUM_ACCESS_TOKEN", cfg.gateway.access_token.take());
    cfg.gateway.timeout_secs =
        env_or_u64("QQSUM_REQUEST_TIMEOUT_SECS", cfg.gateway.timeout_secs);

    cfg.fetch.group_id = env_or_i64("QQSUM_GROUP_ID", cfg.fetch.group_id);
    cfg.fetch.lookback_hours = env_or_u64("QQSUM_LOOKBACK_HOURS", cfg.fetch.lookback_hours);
    cfg.fetch.max_pages = env_or_u64("QQSUM_MAX_PAGES", u64::from(cfg.fetch.max_pages))
        .try_into()
        .unwrap_or(cfg.fetch.max_pages);
    cfg.fetch.max_messages = env_or_u64("QQSUM_MAX_MESSAGES", cfg.fetch.max_messages as u64)
        .try_into()
        .unwrap_or(cfg.fetch.max_messages);
    cfg.fetch.page_size = env_or_u64("QQSUM_PAGE_SIZE", u64::from(cfg.fetch.page_size))
        .try_into()
        .unwrap_or(cfg.fetch.page_size);
    cfg.fetch.delay_ms = env_or_u64("QQSUM_REQUEST_DELAY_MS", cfg.fetch.delay_ms);

    cfg.media.download_timeout_secs =
        env_or_u64("QQSUM_IMAGE_TIMEOUT_SECS", cfg.media.download_timeout_secs);

    cfg.gemini.model = env_or_string("QQSUM_GEMINI_MODEL", &cfg.gemini.model);
    cfg.gemini.api_key = env_first(
        &["QQSUM_GEMINI_API_KEY", "GEMINI_API_KEY"],
        &cfg.gemini.api_key,
    );
    cfg.gemini.base_url = env_or_string("QQSUM_GEMINI_BASE_URL", &cfg.gemini.base_url);
    cfg.gemini.timeout_secs = env_or_u64("QQSUM_GEMINI_TIMEOUT_SECS", cfg.gemini.timeout_secs);

    cfg.prompt.template_path =
        env_or_optional("QQSUM_PROMPT_TEMPLATE", cfg.prompt.template_path.take());
    cfg.prompt.timezone = env_or_optional("QQSUM_TIMEZONE", cfg.prompt.timezone.take());
}

pub fn load_config(config_file: &Path) -> Result<QqsumConfig> {
    let mut cfg = merge_file_config(config_file)?;
    apply_env(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}
