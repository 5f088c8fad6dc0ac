use super::{parse_error, Project};
use crate::auth::{AuthBackend, SignUpResponse};
use crate::error::AuthError;
use crate::http::error_body;
use crate::models::{AuthEvent, AuthEventKind, Session, User};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const EVENT_CAPACITY: usize = 16;
/// Sessions are refreshed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 60;
const IDLE_POLL_SECS: u64 = 30;

/// GoTrue client. Owns the project's current session and pushes every
/// change of it to subscribers.
#[derive(Clone)]
pub struct SupabaseAuth {
    project: Project,
    events: broadcast::Sender<AuthEvent>,
    session_file: Option<PathBuf>,
}

impl SupabaseAuth {
    pub(crate) fn new(project: Project, session_file: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            project,
            events,
            session_file,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.project.url, path)
    }

    fn stored_session(&self) -> Option<Session> {
        self.project.session.read().clone()
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, AuthError> {
        let response = self
            .project
            .http
            .send(request)
            .await
            .map_err(AuthError::Unreachable)?;

        let status = response.status();
        if !status.is_success() {
            let details = parse_error(&error_body(response).await);
            return Err(AuthError::Api {
                status,
                message: details.message,
            });
        }

        let text = response.text().await.map_err(AuthError::Unreachable)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| AuthError::Decode(e.to_string()))
    }

    fn decode_session(body: Value) -> Result<Session, AuthError> {
        serde_json::from_value::<Session>(body)
            .map(|s| s.stamp_expiry(Utc::now().timestamp()))
            .map_err(|e| AuthError::Decode(e.to_string()))
    }

    /// Replaces the held session, mirrors it to the session file and notifies subscribers.
    async fn set_session(&self, session: Option<Session>, kind: AuthEventKind) {
        *self.project.session.write() = session.clone();
        self.persist(session.as_ref()).await;

        // No subscribers is fine.
        let _ = self.events.send(AuthEvent { kind, session });
    }

    async fn persist(&self, session: Option<&Session>) {
        let Some(path) = self.session_file.as_ref() else {
            return;
        };

        let result = match session {
            Some(session) => match serde_json::to_vec_pretty(session) {
                Ok(bytes) => write_file(path, bytes).await,
                Err(e) => Err(e.to_string()),
            },
            None => match fs::remove_file(path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.to_string()),
                _ => Ok(()),
            },
        };

        if let Err(e) = result {
            warn!("Failed to persist session to {}: {}", path.display(), e);
        }
    }

    async fn restore(&self) -> Result<Option<Session>, AuthError> {
        let Some(path) = self.session_file.as_ref() else {
            return Ok(None);
        };

        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AuthError::SessionFile(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthError::SessionFile(e.to_string())),
        }
    }

    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let current = self.stored_session().ok_or(AuthError::MissingSession)?;

        let request = self
            .project
            .request(Method::POST, &self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": current.refresh_token }));

        let session = Self::decode_session(self.send(request).await?)?;
        info!("Access token refreshed");
        self.set_session(Some(session.clone()), AuthEventKind::TokenRefreshed)
            .await;
        Ok(session)
    }

    /// Keeps the access token fresh until the returned task is aborted.
    /// A rejected refresh ends the session.
    pub fn start_auto_refresh(&self) -> JoinHandle<()> {
        let auth = self.clone();
        tokio::spawn(async move {
            loop {
                let now = Utc::now().timestamp();
                let wait = match auth.stored_session().and_then(|s| s.expires_at) {
                    Some(at) => (at - REFRESH_MARGIN_SECS - now).max(1) as u64,
                    None => IDLE_POLL_SECS,
                };
                tokio::time::sleep(Duration::from_secs(wait)).await;

                let due = auth
                    .stored_session()
                    .is_some_and(|s| s.expires_within(Utc::now().timestamp(), REFRESH_MARGIN_SECS));
                if !due {
                    continue;
                }

                match auth.refresh_session().await {
                    Ok(_) => {}
                    Err(e) if e.is_rejection() => {
                        warn!("Refresh rejected: {}, signing out", e);
                        auth.set_session(None, AuthEventKind::SignedOut).await;
                    }
                    Err(e) => warn!("Token refresh failed, will retry: {}", e),
                }
            }
        })
    }
}

async fn write_file(path: &Path, bytes: Vec<u8>) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
    }
    fs::write(path, bytes).await.map_err(|e| e.to_string())
}

#[async_trait]
impl AuthBackend for SupabaseAuth {
    /// In-memory session, else the one in the session file. Expired sessions
    /// are refreshed. Only a refresh the server rejects ends the session; any
    /// other failure is returned and the stored session is kept.
    #[instrument(skip(self))]
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let session = match self.stored_session() {
            Some(session) => session,
            None => match self.restore().await? {
                Some(session) => {
                    debug!("Restored session from file");
                    *self.project.session.write() = Some(session.clone());
                    session
                }
                None => return Ok(None),
            },
        };

        if !session.expires_within(Utc::now().timestamp(), REFRESH_MARGIN_SECS) {
            return Ok(Some(session));
        }

        match self.refresh_session().await {
            Ok(session) => Ok(Some(session)),
            Err(e) if e.is_rejection() => {
                warn!("Stored session was rejected: {}", e);
                self.set_session(None, AuthEventKind::SignedOut).await;
                Ok(None)
            }
            Err(e) => {
                warn!("Stored session could not be refreshed: {}", e);
                Err(e)
            }
        }
    }

    #[instrument(skip(self, password))]
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUpResponse, AuthError> {
        let request = self
            .project
            .request(Method::POST, &self.auth_url("signup"))
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "username": username },
            }));

        let body = self.send(request).await?;
        if body.get("access_token").is_some() {
            let session = Self::decode_session(body)?;
            self.set_session(Some(session.clone()), AuthEventKind::SignedIn)
                .await;
            return Ok(SignUpResponse::Session(session));
        }

        let user: User = serde_json::from_value(body).map_err(|e| AuthError::Decode(e.to_string()))?;
        info!("Sign-up for {} awaits email confirmation", email);
        Ok(SignUpResponse::ConfirmationPending(user))
    }

    #[instrument(skip(self, password))]
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let request = self
            .project
            .request(Method::POST, &self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));

        let session = Self::decode_session(self.send(request).await?)?;
        self.set_session(Some(session.clone()), AuthEventKind::SignedIn)
            .await;
        Ok(session)
    }

    /// The local session is dropped even when the server call fails.
    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), AuthError> {
        let result = match self.stored_session() {
            Some(_) => {
                let request = self.project.request(Method::POST, &self.auth_url("logout"));
                self.send(request).await.map(|_| ())
            }
            None => Ok(()),
        };

        self.set_session(None, AuthEventKind::SignedOut).await;
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
