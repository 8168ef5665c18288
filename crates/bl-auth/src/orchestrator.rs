use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::AuthClient;
use crate::device_code::{DeviceCodePrompt, TokenPoller};
use crate::errors::{AuthError, ErrorKind, RefreshError, Result, Stage, UserAction};
use crate::session::{AccountId, ProviderTokens, Session};
use crate::store::SessionStore;

/// Progress notifications for whatever presents the sign-in to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Show this code and URL to the user
    DeviceCode(DeviceCodePrompt),
    StageStarted(Stage),
    SignedIn { username: String },
    /// Signed in, but the session could not be saved and will not survive a
    /// restart
    SessionNotSaved { message: String },
    SignedOut,
    Failed {
        kind: ErrorKind,
        action: UserAction,
        message: String,
    },
}

/// Owns the launcher session and runs the sign-in flows.
///
/// Cloning is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct AuthOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    client: AuthClient,
    store: Arc<dyn SessionStore>,
    session: RwLock<Option<Session>>,
    interactive: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    events: broadcast::Sender<AuthEvent>,
}

/// Held for the duration of one interactive attempt
struct InteractiveAttempt<'a> {
    inner: &'a Inner,
}

impl<'a> InteractiveAttempt<'a> {
    fn begin(inner: &'a Inner) -> Result<(Self, CancellationToken)> {
        inner
            .interactive
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AuthError::AlreadyInProgress)?;

        let cancel = CancellationToken::new();
        *inner.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());
        Ok((Self { inner }, cancel))
    }
}

impl Drop for InteractiveAttempt<'_> {
    fn drop(&mut self) {
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.interactive.store(false, Ordering::Release);
    }
}

impl AuthOrchestrator {
    /// Create an orchestrator, restoring any session saved in `store`
    pub async fn new(client: AuthClient, store: Arc<dyn SessionStore>) -> Self {
        let session = store.load().await;
        if let Some(session) = &session {
            info!("Restored saved session: {}", session.username);
        }

        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(Inner {
                client,
                store,
                session: RwLock::new(session),
                interactive: AtomicBool::new(false),
                cancel: Mutex::new(None),
                events,
            }),
        }
    }

    /// Subscribe to progress events. Subscribe before starting a flow to see
    /// the device code prompt.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the current session
    pub fn current_session(&self) -> Option<Session> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.current_session().is_some()
    }

    /// Whether an interactive sign-in is running
    pub fn is_authenticating(&self) -> bool {
        self.inner.interactive.load(Ordering::Acquire)
    }

    /// Run the interactive device code sign-in and return the player name.
    ///
    /// Only one interactive attempt runs at a time; a concurrent call fails
    /// with [`AuthError::AlreadyInProgress`] without contacting the provider.
    #[instrument(skip(self))]
    pub async fn authenticate(&self) -> Result<String> {
        let (_attempt, cancel) = InteractiveAttempt::begin(&self.inner)?;
        info!("Starting device code sign-in");

        let result = self.run_interactive(cancel).await;
        self.report(&result);
        result
    }

    async fn run_interactive(&self, cancel: CancellationToken) -> Result<String> {
        let client = &self.inner.client;

        self.emit(AuthEvent::StageStarted(Stage::DeviceCode));
        let mut challenge = client.request_device_code().await?;
        debug!(user_code = %challenge.user_code, "Received device code");
        self.emit(AuthEvent::DeviceCode(challenge.prompt()));

        self.emit(AuthEvent::StageStarted(Stage::TokenPoll));
        let tokens = TokenPoller::new(client, &client.config().poll)
            .with_cancellation(cancel)
            .poll(&mut challenge)
            .await?;

        self.complete_chain(tokens).await
    }

    /// Sign in silently with the saved refresh token and return the player name.
    ///
    /// A revoked or expired refresh token clears the session; the caller should
    /// fall back to [`authenticate`](Self::authenticate).
    #[instrument(skip(self))]
    pub async fn refresh_and_authenticate(&self) -> Result<String> {
        let result = self.run_refresh().await;
        self.report(&result);
        result
    }

    async fn run_refresh(&self) -> Result<String> {
        let refresh_token = match self.current_session() {
            Some(session) if session.is_valid_for_refresh() => session.identity_refresh_token,
            _ => self
                .inner
                .store
                .load()
                .await
                .filter(Session::is_valid_for_refresh)
                .map(|session| session.identity_refresh_token)
                .ok_or(RefreshError::MissingRefreshToken)?,
        };

        info!("Refreshing saved session");
        self.emit(AuthEvent::StageStarted(Stage::TokenRefresh));
        let tokens = match self.inner.client.refresh_provider_token(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(err @ AuthError::Refresh(RefreshError::InvalidGrant { .. })) => {
                warn!("Refresh token rejected, clearing session");
                self.forget_session();
                if let Err(e) = self.inner.store.clear().await {
                    error!("Failed to clear saved session: {}", e);
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        self.complete_chain(tokens).await
    }

    /// XBL → XSTS → Minecraft → profile, then replace and persist the session.
    /// Nothing is kept if any stage fails.
    async fn complete_chain(&self, tokens: ProviderTokens) -> Result<String> {
        let client = &self.inner.client;

        self.emit(AuthEvent::StageStarted(Stage::XboxLive));
        let xbl = client.xbl_authenticate(&tokens.access_token).await?;
        debug!("Step 1/4: Xbox Live token acquired");

        self.emit(AuthEvent::StageStarted(Stage::Xsts));
        let xsts = client.xsts_authorize(&xbl.token).await?;
        debug!("Step 2/4: XSTS token acquired");

        self.emit(AuthEvent::StageStarted(Stage::MinecraftLogin));
        let mc = client.mc_login(&xsts).await?;
        debug!(expires_at = %mc.expires_at, "Step 3/4: Minecraft access token acquired");

        self.emit(AuthEvent::StageStarted(Stage::Profile));
        let profile = client.fetch_profile(&mc.access_token).await?;
        let account_id = AccountId::parse(&profile.id).ok_or_else(|| {
            AuthError::provider(Stage::Profile, format!("invalid profile id {:?}", profile.id))
        })?;
        debug!("Step 4/4: profile resolved");

        let session = Session {
            username: profile.name,
            account_id,
            game_access_token: mc.access_token,
            identity_refresh_token: tokens.refresh_token.unwrap_or_default(),
        };
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(session.clone());

        // The session is usable for this run even when it cannot be saved
        if let Err(e) = self.inner.store.save(&session).await {
            warn!("Failed to persist session: {}", e);
            self.emit(AuthEvent::SessionNotSaved {
                message: e.to_string(),
            });
        }

        info!("Signed in as {}", session.username);
        self.emit(AuthEvent::SignedIn {
            username: session.username.clone(),
        });
        Ok(session.username)
    }

    /// Drop the session from memory and storage
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        self.forget_session();
        self.inner.store.clear().await?;
        info!("Signed out");
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    /// Abort a running interactive sign-in. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run [`authenticate`](Self::authenticate) on a background task
    pub fn spawn_authenticate(&self) -> JoinHandle<Result<String>> {
        let this = self.clone();
        tokio::spawn(async move { this.authenticate().await })
    }

    /// Run [`refresh_and_authenticate`](Self::refresh_and_authenticate) on a
    /// background task
    pub fn spawn_refresh(&self) -> JoinHandle<Result<String>> {
        let this = self.clone();
        tokio::spawn(async move { this.refresh_and_authenticate().await })
    }

    fn forget_session(&self) {
        self.inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn report(&self, result: &Result<String>) {
        if let Err(err) = result {
            warn!("Authentication failed: {}", err);
            self.emit(AuthEvent::Failed {
                kind: err.kind(),
                action: err.action(),
                message: err.to_string(),
            });
        }
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}
