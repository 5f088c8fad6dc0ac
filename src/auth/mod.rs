//! Holder of the current identity and session.
//!
//! States: unauthenticated, authenticating (while a sign-in or sign-up is
//! pending) and authenticated. Identity and session only exist together,
//! inside [`AuthState::Authenticated`]. Every transition is mirrored to the
//! [`IdentityMirror`].

use crate::error::AuthError;
use crate::mirror::IdentityMirror;
use crate::models::{AuthEvent, AuthEventKind, Identity, Session, User};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

#[async_trait]
pub trait AuthBackend: Send + Sync + 'static {
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUpResponse, AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Session changes made anywhere: sign-ins, token refreshes, sign-outs.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

#[derive(Debug, Clone)]
pub enum SignUpResponse {
    Session(Session),
    /// Account created, but the email address has to be confirmed before a session exists.
    ConfirmationPending(User),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(Identity),
    ConfirmationPending { email: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated { identity: Identity, session: Session },
}

struct Inner<B> {
    backend: B,
    mirror: Arc<dyn IdentityMirror>,
    state: RwLock<AuthState>,
    last_error: RwLock<Option<String>>,
    loading: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<B> Inner<B> {
    /// Sets identity and session together, or clears both.
    fn apply(&self, session: Option<Session>) {
        match session {
            Some(session) => {
                let identity = session.identity();
                if let Err(e) = self.mirror.store(&identity) {
                    warn!("Failed to mirror identity: {}", e);
                }
                *self.state.write() = AuthState::Authenticated { identity, session };
            }
            None => {
                if let Err(e) = self.mirror.clear() {
                    warn!("Failed to clear identity mirror: {}", e);
                }
                *self.state.write() = AuthState::Unauthenticated;
            }
        }
    }
}

impl<B> Drop for Inner<B> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

pub struct SessionHolder<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for SessionHolder<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: AuthBackend> SessionHolder<B> {
    pub fn new(backend: B, mirror: Arc<dyn IdentityMirror>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                mirror,
                state: RwLock::new(AuthState::Unauthenticated),
                last_error: RwLock::new(None),
                loading: AtomicBool::new(false),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Picks up the existing session and starts following pushed session
    /// changes. The subscription is taken before the session is read so no
    /// change in between is missed.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), AuthError> {
        self.inner.loading.store(true, Ordering::SeqCst);
        let events = self.inner.backend.subscribe();

        let result = self.inner.backend.current_session().await;
        match &result {
            Ok(Some(session)) => {
                info!(
                    "User restored from session: {}",
                    session.user.email.as_deref().unwrap_or(&session.user.id)
                );
                self.inner.apply(Some(session.clone()));
            }
            Ok(None) => self.inner.apply(None),
            Err(e) => {
                error!("Auth initialization error: {}", e);
                *self.inner.last_error.write() = Some(e.to_string());
            }
        }

        let listener = tokio::spawn(listen(Arc::downgrade(&self.inner), events));
        if let Some(previous) = self.inner.listener.lock().replace(listener) {
            previous.abort();
        }

        self.inner.loading.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    pub fn shutdown(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
    }

    /// `username` defaults to the local part of `email`.
    #[instrument(skip(self, password))]
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: Option<&str>,
    ) -> Result<SignUpOutcome, AuthError> {
        let username = username
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or(email));

        let previous = self.begin();
        let result = self.inner.backend.sign_up(email, password, username).await;
        self.inner.loading.store(false, Ordering::SeqCst);

        match result {
            Ok(SignUpResponse::Session(session)) => {
                let identity = session.identity();
                self.inner.apply(Some(session));
                info!("User signed up: {}", email);
                Ok(SignUpOutcome::SignedIn(identity))
            }
            Ok(SignUpResponse::ConfirmationPending(user)) => {
                self.restore(previous);
                Ok(SignUpOutcome::ConfirmationPending {
                    email: user.email.unwrap_or_else(|| email.to_string()),
                })
            }
            Err(e) => {
                error!("Sign up error: {}", e);
                self.fail(previous, &e);
                Err(e)
            }
        }
    }

    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let previous = self.begin();
        let result = self.inner.backend.sign_in_with_password(email, password).await;
        self.inner.loading.store(false, Ordering::SeqCst);

        match result {
            Ok(session) => {
                let identity = session.identity();
                self.inner.apply(Some(session));
                info!("User logged in and saved: {}", email);
                Ok(identity)
            }
            Err(e) => {
                error!("Sign in error: {}", e);
                self.fail(previous, &e);
                Err(e)
            }
        }
    }

    /// Local state is cleared whether or not the backend call succeeds.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.loading.store(true, Ordering::SeqCst);
        *self.inner.last_error.write() = None;

        let result = self.inner.backend.sign_out().await;
        self.inner.apply(None);
        self.inner.loading.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => info!("User logged out and cleared from storage"),
            Err(e) => {
                error!("Sign out error: {}", e);
                *self.inner.last_error.write() = Some(e.to_string());
            }
        }
        result
    }

    fn begin(&self) -> AuthState {
        self.inner.loading.store(true, Ordering::SeqCst);
        *self.inner.last_error.write() = None;
        std::mem::replace(&mut *self.inner.state.write(), AuthState::Authenticating)
    }

    /// Puts back `previous` unless a pushed event already moved the state on.
    fn restore(&self, previous: AuthState) {
        let mut state = self.inner.state.write();
        if *state == AuthState::Authenticating {
            *state = previous;
        }
    }

    fn fail(&self, previous: AuthState, e: &AuthError) {
        *self.inner.last_error.write() = Some(e.to_string());
        self.restore(previous);
    }
}

impl<B> SessionHolder<B> {
    pub fn state(&self) -> AuthState {
        self.inner.state.read().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        match &*self.inner.state.read() {
            AuthState::Authenticated { identity, .. } => Some(identity.clone()),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<Session> {
        match &*self.inner.state.read() {
            AuthState::Authenticated { session, .. } => Some(session.clone()),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<String> {
        self.identity().map(|i| i.user_id)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.inner.state.read(), AuthState::Authenticated { .. })
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.read().clone()
    }
}

async fn listen<B>(inner: Weak<Inner<B>>, mut events: broadcast::Receiver<AuthEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let session = match event.kind {
                    AuthEventKind::SignedOut => None,
                    _ => event.session,
                };
                match &session {
                    Some(s) => info!("Auth state changed: {:?} {}", event.kind, s.user.id),
                    None => info!("Auth state changed: logged out"),
                }
                inner.apply(session);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Missed {} auth events", skipped);
            }
            Err(RecvError::Closed) => {
                debug!("Auth event stream closed");
                break;
            }
        }
    }
}
