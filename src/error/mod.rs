use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(
        "TMDB 401 Unauthorized: check tmdb.apiKey / tmdb.token (or TMDB_API_KEY / TMDB_TOKEN): {body}"
    )]
    Unauthorized { body: String },

    #[error("TMDB request failed ({status}): {body}")]
    ProviderRequest { status: StatusCode, body: String },

    #[error("TMDB unreachable: {0}")]
    ProviderUnreachable(#[source] reqwest::Error),

    #[error("Invalid TMDB url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Failed to decode TMDB response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("User id required to modify saved shows")]
    MissingIdentity,

    #[error("Show already saved for this user")]
    DuplicateKey,

    #[error("Remote write failed ({status}): {message}")]
    RemoteWrite { status: StatusCode, message: String },

    #[error("Remote read failed ({status}): {message}")]
    RemoteRead { status: StatusCode, message: String },

    #[error("Backend unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("Failed to decode backend response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Auth request failed ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("Auth service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("Failed to decode auth response: {0}")]
    Decode(String),

    #[error("Missing session")]
    MissingSession,

    #[error("Session file error: {0}")]
    SessionFile(String),
}

impl AuthError {
    /// The auth service refused the request itself, as opposed to being
    /// unreachable or failing internally.
    pub fn is_rejection(&self) -> bool {
        matches!(self, AuthError::Api { status, .. } if status.is_client_error())
    }
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Mirror I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mirror JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
