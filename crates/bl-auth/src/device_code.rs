use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::PollPolicy;
use crate::errors::{AuthError, ErrorKind, Result, Stage};
use crate::session::ProviderTokens;

/// Device code challenge issued by the identity provider
#[derive(Clone)]
pub struct DeviceCodeChallenge {
    /// Provider-internal code, never shown to the user
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Polling must stop at or before this instant
    pub expires_at: Instant,
    /// Grows on `slow_down`
    pub poll_interval: Duration,
}

impl DeviceCodeChallenge {
    /// What the user needs to see to finish signing in
    pub fn prompt(&self) -> DeviceCodePrompt {
        DeviceCodePrompt {
            user_code: self.user_code.clone(),
            verification_uri: self.verification_uri.clone(),
            expires_in: self.expires_at.saturating_duration_since(Instant::now()),
        }
    }
}

impl fmt::Debug for DeviceCodeChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCodeChallenge")
            .field("device_code", &"[REDACTED]")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_at", &self.expires_at)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Display-safe part of a [`DeviceCodeChallenge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCodePrompt {
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: Duration,
}

/// Outcome of a single token endpoint poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResponse {
    Authorized(ProviderTokens),
    /// `authorization_pending`
    Pending,
    /// `slow_down`
    SlowDown,
    /// Any other error code: denied, expired, bad verification code, ...
    Rejected {
        error: String,
        description: Option<String>,
    },
}

/// Poller state. `Pending` and `SlowDown` loop, the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending,
    SlowDown,
    Succeeded,
    Denied,
    Expired,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::SlowDown)
    }

    fn of(response: &PollResponse) -> Self {
        match response {
            PollResponse::Authorized(_) => Self::Succeeded,
            PollResponse::Pending => Self::Pending,
            PollResponse::SlowDown => Self::SlowDown,
            PollResponse::Rejected { .. } => Self::Denied,
        }
    }
}

/// Token endpoint as seen by the poller
#[async_trait::async_trait]
pub trait DeviceTokenSource: Send + Sync {
    /// Issue one device code grant request
    async fn poll_device_token(&self, device_code: &str) -> Result<PollResponse>;
}

/// Polls the token endpoint until the user finishes verification
pub struct TokenPoller<'a> {
    source: &'a dyn DeviceTokenSource,
    policy: &'a PollPolicy,
    cancel: CancellationToken,
}

impl<'a> TokenPoller<'a> {
    pub fn new(source: &'a dyn DeviceTokenSource, policy: &'a PollPolicy) -> Self {
        Self {
            source,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort polling when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sleep-then-poll until a token arrives, the provider rejects the code, or
    /// the challenge deadline passes. No request is sent after the deadline.
    #[instrument(skip_all, fields(user_code = %challenge.user_code))]
    pub async fn poll(&self, challenge: &mut DeviceCodeChallenge) -> Result<ProviderTokens> {
        let mut transport_failures = 0u32;

        loop {
            let wake_at = Instant::now().checked_add(challenge.poll_interval);
            let Some(wake_at) = wake_at.filter(|wake_at| *wake_at <= challenge.expires_at) else {
                self.sleep_until(challenge.expires_at).await?;
                info!(state = ?PollState::Expired, "Device code expired before sign-in completed");
                return Err(AuthError::DeviceCodeExpired);
            };
            self.sleep_until(wake_at).await?;

            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AuthError::Cancelled),
                response = self.source.poll_device_token(&challenge.device_code) => response,
            };

            let response = match response {
                Ok(response) => response,
                Err(err) if err.kind() == ErrorKind::Network => {
                    transport_failures += 1;
                    if transport_failures > self.policy.transient_retries {
                        return Err(err);
                    }
                    warn!(
                        attempt = transport_failures,
                        "Token poll failed, keeping current state: {}", err
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            transport_failures = 0;

            let state = PollState::of(&response);
            debug!(?state, interval = ?challenge.poll_interval, "Poll attempt finished");

            match response {
                PollResponse::Authorized(tokens) => {
                    info!("User completed device code verification");
                    return Ok(tokens);
                }
                PollResponse::Pending => {}
                PollResponse::SlowDown => {
                    let ceiling = self.policy.max_interval.max(challenge.poll_interval);
                    challenge.poll_interval = challenge
                        .poll_interval
                        .saturating_add(self.policy.slow_down_increment)
                        .min(ceiling);
                    debug!(interval = ?challenge.poll_interval, "Provider asked to slow down");
                }
                PollResponse::Rejected { error, description } => {
                    warn!(%error, "Device code rejected by provider");
                    let message = match description {
                        Some(description) => format!("{error}: {description}"),
                        None => error,
                    };
                    return Err(AuthError::provider(Stage::TokenPoll, message));
                }
            }
        }
    }

    async fn sleep_until(&self, deadline: Instant) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AuthError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Ok(()),
        }
    }
}
