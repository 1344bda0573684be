use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventSubConfig {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scopes: ScopesConfig,
}

/// Remote API access
#[derive(Clone, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub client_id: String,
    /// App access token (never logged)
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_api_base_url() -> String {
    "https://api.twitch.tv/helix".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            client_id: String::new(),
            access_token: String::new(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("api_base_url", &self.api_base_url)
            .field("client_id", &self.client_id)
            .field("access_token", &"<redacted>")
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// Public endpoint the webhook receiver listens on
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackConfig {
    /// Public base URL of this deployment (e.g. https://bot.example.com)
    #[serde(default)]
    pub public_base_url: String,
    #[serde(default = "default_callback_path")]
    pub path: String,
}

fn default_callback_path() -> String {
    "/api/eventsub/callback".to_string()
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            public_base_url: String::new(),
            path: default_callback_path(),
        }
    }
}

/// Which key-value store backs the shared cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Sqlite,
}

/// Shared cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_path")]
    pub sqlite_path: PathBuf,
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Sqlite
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("eventsub-cache.db")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            sqlite_path: default_cache_path(),
        }
    }
}

/// Scope grant storage
#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    #[serde(default = "default_scopes_path")]
    pub sqlite_path: PathBuf,
}

fn default_scopes_path() -> PathBuf {
    PathBuf::from("eventsub-scopes.db")
}

impl Default for ScopesConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_scopes_path(),
        }
    }
}

/// Configuration errors
#[derive(Debug, PartialEq, Clone)]
pub enum ConfigError {
    /// callback.public_base_url is empty
    MissingPublicBaseUrl,
    /// platform.client_id or platform.access_token is empty
    MissingCredentials,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingPublicBaseUrl => write!(
                f,
                "callback.public_base_url is not set (EVENTSUB_PUBLIC_BASE_URL)"
            ),
            ConfigError::MissingCredentials => write!(
                f,
                "platform.client_id and platform.access_token are required (EVENTSUB_CLIENT_ID, EVENTSUB_ACCESS_TOKEN)"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl EventSubConfig {
    /// Apply environment overrides on top of file values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("EVENTSUB_CLIENT_ID") {
            self.platform.client_id = v;
        }
        if let Ok(v) = std::env::var("EVENTSUB_ACCESS_TOKEN") {
            self.platform.access_token = v;
        }
        if let Ok(v) = std::env::var("EVENTSUB_API_BASE_URL") {
            self.platform.api_base_url = v;
        }
        if let Ok(v) = std::env::var("EVENTSUB_PUBLIC_BASE_URL") {
            self.callback.public_base_url = v;
        }
        self
    }

    /// Public callback URL registered on the conduit shard.
    ///
    /// Joins base URL and path with exactly one `/`.
    pub fn callback_url(&self) -> Result<String, ConfigError> {
        let base = self.callback.public_base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(ConfigError::MissingPublicBaseUrl);
        }
        let path = self.callback.path.trim_start_matches('/');
        Ok(format!("{}/{}", base, path))
    }

    /// Fail early when the remote API cannot be reached with these settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform.client_id.is_empty() || self.platform.access_token.is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        self.callback_url()?;
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<EventSubConfig> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: EventSubConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load from `path` if it exists, otherwise defaults; then apply env overrides.
pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<EventSubConfig> {
    let config = if path.as_ref().exists() {
        load_config(path)?
    } else {
        EventSubConfig::default()
    };
    Ok(config.apply_env())
}
