mod browser;

pub use browser::{BrowseMode, CatalogBrowser};

use crate::config::TmdbConfig;
use crate::error::CatalogError;
use crate::http::{error_body, HttpClient};
use crate::models::{CatalogItem, Genre};
use reqwest::{Method, StatusCode};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

pub struct TmdbClient {
    http: HttpClient,
    config: TmdbConfig,
}

/// Only `id` is required; a null or mistyped extra field reads as absent.
#[derive(Debug, Deserialize)]
struct TmdbResult {
    #[serde(deserialize_with = "numeric_id")]
    id: i64,
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    original_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    poster_path: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    vote_average: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    genre_ids: Option<Vec<i64>>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn numeric_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| de::Error::custom(format!("id {} is not an integer", n))),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("unexpected id {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct GenreList {
    #[serde(default)]
    genres: Vec<Genre>,
}

pub fn build_trending_endpoint() -> String {
    "/trending/tv/week".to_string()
}

pub fn build_popular_endpoint() -> String {
    "/tv/popular".to_string()
}

/// Empty string when the query is blank; callers must not fetch it.
pub fn build_search_endpoint(query: &str) -> String {
    let query = query.trim();
    if query.is_empty() {
        return String::new();
    }
    format!("/search/tv?query={}", urlencoding::encode(query))
}

pub fn with_page(endpoint: &str, page: u32) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}page={}", endpoint, separator, page)
}

/// `name`, then `original_name`, then `title`, then "Untitled".
fn resolve_name(result: &TmdbResult) -> String {
    [&result.name, &result.original_name, &result.title]
        .into_iter()
        .flatten()
        .find(|n| !n.is_empty())
        .cloned()
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Bare array or `{ "results": [...] }`; anything else is an empty list.
fn extract_results(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

impl TmdbClient {
    pub fn new(http: HttpClient, config: TmdbConfig) -> Self {
        Self { http, config }
    }

    pub fn resolve_poster(&self, poster_path: Option<&str>) -> String {
        match poster_path.map(|p| p.trim_start_matches('/')) {
            Some(path) if !path.is_empty() => format!(
                "{}/{}/{}",
                self.config.image_base_url.trim_end_matches('/'),
                self.config.image_size,
                path
            ),
            _ => self.config.placeholder.clone(),
        }
    }

    /// Absolute urls pass through; bare paths are joined onto the API base.
    pub fn resolve_url(&self, endpoint: &str) -> Result<Url, CatalogError> {
        let raw = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.base_url.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            )
        };

        let mut url = Url::parse(&raw)?;
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            if !url.query_pairs().any(|(name, _)| name == "api_key") {
                url.query_pairs_mut().append_pair("api_key", key);
            }
        }
        Ok(url)
    }

    fn normalize(&self, result: TmdbResult) -> CatalogItem {
        CatalogItem {
            id: result.id,
            name: resolve_name(&result),
            image: self.resolve_poster(result.poster_path.as_deref()),
            rating: result.vote_average,
            genre_ids: result.genre_ids.unwrap_or_default(),
        }
    }

    #[instrument(skip(self))]
    async fn get_json(&self, endpoint: &str) -> Result<Value, CatalogError> {
        let url = self.resolve_url(endpoint)?;

        let mut request = self.http.request(Method::GET, url.as_str());
        if let Some(token) = self.config.token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = self
            .http
            .send(request)
            .await
            .map_err(CatalogError::ProviderUnreachable)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            error!("TMDB rejected credentials");
            return Err(CatalogError::Unauthorized {
                body: error_body(response).await,
            });
        }
        if !status.is_success() {
            return Err(CatalogError::ProviderRequest {
                status,
                body: error_body(response).await,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn fetch_list(&self, endpoint: &str) -> Result<Vec<CatalogItem>, CatalogError> {
        let body = self.get_json(endpoint).await?;

        let items: Vec<CatalogItem> = extract_results(body)
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<TmdbResult>(raw) {
                Ok(result) => Some(self.normalize(result)),
                Err(e) => {
                    warn!("Skipping malformed TMDB result: {}", e);
                    None
                }
            })
            .collect();

        debug!("Fetched {} catalog items", items.len());
        Ok(items)
    }

    /// TV genre list; failures are logged and yield an empty list.
    #[instrument(skip(self))]
    pub async fn fetch_genres(&self) -> Vec<Genre> {
        let body = match self.get_json("/genre/tv/list?language=en").await {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to fetch genres: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_value::<GenreList>(body) {
            Ok(list) => {
                info!("Fetched {} genres", list.genres.len());
                list.genres
            }
            Err(e) => {
                error!("Failed to decode genres: {}", e);
                Vec::new()
            }
        }
    }
}
