//! REST client for the hosted Supabase project: the `saved_shows` table
//! (PostgREST) and the auth sub-service (GoTrue).

mod auth;
mod table;

pub use auth::SupabaseAuth;
pub use table::SavedShowsTable;

use crate::http::HttpClient;
use crate::models::Session;
use parking_lot::RwLock;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Connection details shared by the table and auth clients. Both see the
/// same session, so table calls carry the signed-in user's token.
#[derive(Clone)]
pub(crate) struct Project {
    http: HttpClient,
    url: String,
    anon_key: String,
    session: Arc<RwLock<Option<Session>>>,
}

impl Project {
    fn new(http: HttpClient, url: &str, anon_key: &str) -> Self {
        Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// Access token of the current session, or the anon key when signed out.
    fn bearer(&self) -> String {
        self.session
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }
}

pub fn connect(
    http: HttpClient,
    url: &str,
    anon_key: &str,
    session_file: Option<PathBuf>,
) -> (SupabaseAuth, SavedShowsTable) {
    let project = Project::new(http, url, anon_key);
    (
        SupabaseAuth::new(project.clone(), session_file),
        SavedShowsTable::new(project),
    )
}

/// Error payloads differ between PostgREST and GoTrue; this accepts both.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    code: Option<Value>,
    message: Option<String>,
    msg: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, PartialEq)]
pub(crate) struct ApiErrorDetails {
    pub code: Option<String>,
    pub message: String,
}

pub(crate) fn parse_error(body: &str) -> ApiErrorDetails {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();

    let code = parsed.code.map(|c| match c {
        Value::String(s) => s,
        other => other.to_string(),
    });
    let message = parsed
        .error_description
        .or(parsed.msg)
        .or(parsed.message)
        .or(parsed.error)
        .unwrap_or_else(|| body.to_string());

    ApiErrorDetails { code, message }
}
