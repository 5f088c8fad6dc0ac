use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
pub const DEFAULT_IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p";
pub const DEFAULT_IMAGE_SIZE: &str = "w342";
pub const DEFAULT_PLACEHOLDER: &str = "https://via.placeholder.com/342x513?text=No+Image";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Configuration {
    #[serde(default)]
    pub tmdb: TmdbConfig,
    #[serde(default)]
    pub supabase: SupabaseConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbConfig {
    #[serde(rename = "baseUrl", default = "default_tmdb_base_url")]
    pub base_url: String,
    #[serde(rename = "imageBaseUrl", default = "default_image_base_url")]
    pub image_base_url: String,
    #[serde(rename = "imageSize", default = "default_image_size")]
    pub image_size: String,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    pub token: Option<String>,
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            base_url: default_tmdb_base_url(),
            image_base_url: default_image_base_url(),
            image_size: default_image_size(),
            placeholder: default_placeholder(),
            api_key: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SupabaseConfig {
    pub url: Option<String>,
    #[serde(rename = "anonKey")]
    pub anon_key: Option<String>,
    #[serde(rename = "sessionFile")]
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MirrorConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(rename = "timeoutSeconds")]
    pub timeout_seconds: Option<u64>,
}

fn default_tmdb_base_url() -> String {
    DEFAULT_TMDB_BASE_URL.to_string()
}

fn default_image_base_url() -> String {
    DEFAULT_IMAGE_BASE_URL.to_string()
}

fn default_image_size() -> String {
    DEFAULT_IMAGE_SIZE.to_string()
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

impl Configuration {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Configuration = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Reads `path` if it exists, then applies environment overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            info!("Loading configuration from: {}", path);
            Self::from_file(path)?
        } else {
            warn!("Configuration file {} not found, using defaults", path);
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Environment wins over the file for secrets and endpoints.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|&k| lookup(k))
                .find(|v| !v.trim().is_empty())
        };

        if let Some(key) = first(&["TMDB_API_KEY", "TMDB_KEY"]) {
            self.tmdb.api_key = Some(key);
        }
        if let Some(token) = first(&["TMDB_TOKEN", "TMDB_BEARER"]) {
            self.tmdb.token = Some(token);
        }
        if let Some(url) = first(&["SUPABASE_URL"]) {
            self.supabase.url = Some(url);
        }
        if let Some(key) = first(&["SUPABASE_KEY", "SUPABASE_ANON_KEY"]) {
            self.supabase.anon_key = Some(key);
        }
    }

    pub fn supabase_credentials(&self) -> anyhow::Result<(&str, &str)> {
        let url = self
            .supabase
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("supabase.url (or SUPABASE_URL) is not configured"))?;
        let key = self
            .supabase
            .anon_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("supabase.anonKey (or SUPABASE_KEY) is not configured"))?;
        Ok((url, key))
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http.timeout_seconds.map(Duration::from_secs)
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.mirror
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".showtrack/identity.json"))
    }

    pub fn session_file(&self) -> PathBuf {
        self.supabase
            .session_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(".showtrack/session.json"))
    }
}
