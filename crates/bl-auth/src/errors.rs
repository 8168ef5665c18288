use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

/// Pipeline stage an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DeviceCode,
    TokenPoll,
    TokenRefresh,
    XboxLive,
    Xsts,
    MinecraftLogin,
    Profile,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DeviceCode => "device code request",
            Self::TokenPoll => "token polling",
            Self::TokenRefresh => "token refresh",
            Self::XboxLive => "Xbox Live authentication",
            Self::Xsts => "XSTS authorization",
            Self::MinecraftLogin => "Minecraft login",
            Self::Profile => "profile lookup",
        };
        f.write_str(name)
    }
}

/// Authentication pipeline error types
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status} during {stage}: {body_snippet}")]
    Http {
        stage: Stage,
        status: StatusCode,
        body_snippet: String,
    },

    #[error("{stage} failed: {message}")]
    Provider { stage: Stage, message: String },

    #[error("XSTS authorization denied: {0}")]
    XstsDenied(#[from] XstsError),

    #[error("Device code expired before the sign-in was completed")]
    DeviceCodeExpired,

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("Minecraft profile not found - user may not own Minecraft or hasn't created a profile")]
    MinecraftProfileNotFound,

    #[error("An interactive sign-in is already in progress")]
    AlreadyInProgress,

    #[error("User cancelled the authentication flow")]
    Cancelled,

    #[error("Session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Session store is locked by another process")]
    LockTimeout,

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Failures specific to the refresh-token grant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("OAuth invalid_grant - refresh token expired or revoked, sign in again")]
    InvalidGrant { description: Option<String> },

    #[error("No saved session to refresh")]
    MissingRefreshToken,
}

/// XSTS-specific error codes from XErr field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XstsError {
    #[error("Account doesn't have an Xbox account (XErr: 2148916233)")]
    NoXboxAccount,

    #[error("Xbox Live not available in this country (XErr: 2148916235)")]
    RegionNotSupported,

    #[error("Adult verification required on Xbox page (XErr: 2148916236/2148916237)")]
    AdultVerificationRequired,

    #[error("Child account requires Family (XErr: 2148916238)")]
    ChildAccountRequiresFamily,

    #[error("Unknown XSTS error code: {0}")]
    Unknown(u64),
}

impl XstsError {
    /// Parse XErr code from XSTS response
    pub fn from_xerr(code: u64) -> Self {
        match code {
            2148916233 => Self::NoXboxAccount,
            2148916235 => Self::RegionNotSupported,
            2148916236 | 2148916237 => Self::AdultVerificationRequired,
            2148916238 => Self::ChildAccountRequiresFamily,
            code => Self::Unknown(code),
        }
    }
}

/// Coarse classification of an [`AuthError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Provider,
    Timeout,
    InvalidGrant,
    Profile,
    AlreadyInProgress,
    Cancelled,
    Storage,
}

/// What the caller should offer the user after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Transient; offer a retry of the same flow
    Retry,
    /// The saved credential is unusable; start a fresh interactive sign-in
    SignInAgain,
    /// Identity is fine but the account does not own the game
    MissingOwnership,
    /// Another attempt is running; wait for it
    Wait,
    /// Nothing to do
    None,
}

impl AuthError {
    pub(crate) fn provider(stage: Stage, message: impl Into<String>) -> Self {
        Self::Provider {
            stage,
            message: message.into(),
        }
    }

    pub(crate) fn http(stage: Stage, status: StatusCode, body: &str) -> Self {
        Self::Http {
            stage,
            status,
            body_snippet: snippet(body),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Http { status, .. }
                if status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS =>
            {
                ErrorKind::Network
            }
            Self::Http { .. } | Self::Provider { .. } | Self::XstsDenied(_) => ErrorKind::Provider,
            Self::UrlParse(_) => ErrorKind::Provider,
            Self::DeviceCodeExpired => ErrorKind::Timeout,
            Self::Refresh(RefreshError::InvalidGrant { .. }) => ErrorKind::InvalidGrant,
            Self::Refresh(RefreshError::MissingRefreshToken) => ErrorKind::InvalidGrant,
            Self::MinecraftProfileNotFound => ErrorKind::Profile,
            Self::AlreadyInProgress => ErrorKind::AlreadyInProgress,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) | Self::Serde(_) | Self::LockTimeout => ErrorKind::Storage,
        }
    }

    pub fn action(&self) -> UserAction {
        match self.kind() {
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Storage => UserAction::Retry,
            ErrorKind::Provider | ErrorKind::InvalidGrant => UserAction::SignInAgain,
            ErrorKind::Profile => UserAction::MissingOwnership,
            ErrorKind::AlreadyInProgress => UserAction::Wait,
            ErrorKind::Cancelled => UserAction::None,
        }
    }

    /// True when retrying the same flow later may succeed
    pub fn is_transient(&self) -> bool {
        self.action() == UserAction::Retry
    }
}

/// First 200 characters of a response body, for diagnostics
pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

pub type Result<T> = std::result::Result<T, AuthError>;
