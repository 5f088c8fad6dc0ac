use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Watch status of a saved show. Exactly one applies at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ShowStatus {
    Planning,
    Watching,
    Watched,
    Dropped,
}

impl ShowStatus {
    pub const ALL: [ShowStatus; 4] = [
        ShowStatus::Planning,
        ShowStatus::Watching,
        ShowStatus::Watched,
        ShowStatus::Dropped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShowStatus::Planning => "planning",
            ShowStatus::Watching => "watching",
            ShowStatus::Watched => "watched",
            ShowStatus::Dropped => "dropped",
        }
    }
}

impl fmt::Display for ShowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planning" => Ok(ShowStatus::Planning),
            "watching" => Ok(ShowStatus::Watching),
            "watched" => Ok(ShowStatus::Watched),
            "dropped" => Ok(ShowStatus::Dropped),
            other => Err(format!("unknown show status: {}", other)),
        }
    }
}

/// A row of the `saved_shows` table, and its local mirror.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub tmdb_id: i64,
    pub name: String,
    pub status: ShowStatus,
    #[serde(default)]
    pub is_favourite: bool,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(alias = "addedDate")]
    pub added_date: DateTime<Utc>,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewShowRecord {
    pub tmdb_id: i64,
    pub name: String,
    pub status: ShowStatus,
    pub is_favourite: bool,
    pub image: Option<String>,
    pub user_id: String,
    pub added_date: DateTime<Utc>,
}

impl NewShowRecord {
    pub fn into_record(self) -> ShowRecord {
        ShowRecord {
            id: None,
            tmdb_id: self.tmdb_id,
            name: self.name,
            status: self.status,
            is_favourite: self.is_favourite,
            image: self.image,
            added_date: self.added_date,
            user_id: self.user_id,
        }
    }
}

/// Columns touched by an update. `added_date` and `user_id` are never rewritten.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ShowChanges {
    pub status: ShowStatus,
    pub name: String,
    pub image: Option<String>,
    pub is_favourite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogItem {
    pub id: i64,
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genre_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user.id.clone(),
            email: self.user.email.clone(),
        }
    }

    /// Fills `expires_at` from `expires_in` when the server left it out.
    pub fn stamp_expiry(mut self, now: i64) -> Self {
        if self.expires_at.is_none() && self.expires_in > 0 {
            self.expires_at = Some(now + self.expires_in);
        }
        self
    }

    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        match self.expires_at {
            Some(at) => at - margin_secs <= now,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    SignedIn,
    TokenRefreshed,
    SignedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}
