use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Byte budget for the offline cache.
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: usize,
}

fn default_db_path() -> String {
    "panchayat.db".to_string()
}

fn default_capacity_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            capacity_bytes: default_capacity_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote mirror this instance syncs against.
    #[serde(default = "default_remote_base_url")]
    pub remote_base_url: String,
    /// Delay after connectivity regain before auto-syncing, to avoid
    /// thrashing on flaky reconnects.
    #[serde(default = "default_auto_sync_delay_secs")]
    pub auto_sync_delay_secs: u64,
    /// Interval for recomputing the pending-change count.
    #[serde(default = "default_pending_check_interval_secs")]
    pub pending_check_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_remote_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_auto_sync_delay_secs() -> u64 {
    2
}

fn default_pending_check_interval_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_base_url: default_remote_base_url(),
            auto_sync_delay_secs: default_auto_sync_delay_secs(),
            pending_check_interval_secs: default_pending_check_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_genai_base_url")]
    pub base_url: String,
    #[serde(default = "default_genai_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_genai_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_genai_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_genai_model() -> String {
    "gemini-pro".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_k() -> u32 {
    40
}

fn default_top_p() -> f64 {
    0.95
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_genai_timeout_secs() -> u64 {
    60
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_genai_base_url(),
            model: default_genai_model(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_genai_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Secret for HMAC-signed bearer tokens. Empty means "generate at boot"
    /// (tokens then die with the process).
    #[serde(default)]
    pub token_secret: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    /// Account promoted to admin at boot, if it exists.
    #[serde(default)]
    pub admin_email: String,
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_token_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token_secret: String::new(),
            token_ttl_secs: default_token_ttl_secs(),
            admin_email: String::new(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&raw)?;

        // Env var beats the file for the API key so the key can stay out of
        // world-readable config.
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                config.assistant.api_key = key;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_product_constants() {
        let config = AppConfig::default();
        assert_eq!(config.sync.auto_sync_delay_secs, 2);
        assert_eq!(config.sync.pending_check_interval_secs, 30);
        assert_eq!(config.store.capacity_bytes, 5 * 1024 * 1024);
        assert_eq!(config.assistant.temperature, 0.7);
        assert_eq!(config.assistant.top_k, 40);
        assert_eq!(config.assistant.max_output_tokens, 1024);
    }

    #[test]
    fn partial_toml_fills_missing_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            [sync]
            remote_base_url = "https://portal.example.org"
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.remote_base_url, "https://portal.example.org");
        assert_eq!(config.sync.auto_sync_delay_secs, 2);
        assert_eq!(config.server.bind, "0.0.0.0:5000");
    }
}
