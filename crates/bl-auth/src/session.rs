use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::errors::{AuthError, Result, Stage};

/// Stable Minecraft account identifier.
///
/// Minecraft Services sends the 32-hex-digit form; launchers and logs often use
/// the hyphenated one. Both parse to the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Parse either the simple or the hyphenated rendering
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::try_parse(raw.trim()).ok().map(Self)
    }

    /// 32 lowercase hex digits, no separators
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }

    /// 8-4-4-4-12 form
    pub fn hyphenated(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.simple(), f)
    }
}

/// Launch-ready session, the only state that is persisted
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub account_id: AccountId,
    pub game_access_token: String,
    pub identity_refresh_token: String,
}

impl Session {
    /// Only the identity refresh token can regenerate the chain; the game token
    /// on its own expires too quickly to count.
    pub fn is_valid_for_refresh(&self) -> bool {
        !self.identity_refresh_token.is_empty()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("account_id", &self.account_id)
            .field("game_access_token", &"[REDACTED]")
            .field("identity_refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Identity provider tokens
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderTokens {
    pub access_token: String,
    /// Sent only to the identity provider's token endpoint
    pub refresh_token: Option<String>,
}

impl fmt::Debug for ProviderTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Xbox Live user token, consumed once by XSTS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XblToken {
    pub token: String,
}

/// XSTS token scoped to Minecraft Services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XstsToken {
    pub token: String,
    pub uhs: String,
}

impl XstsToken {
    /// Authorization value expected by `login_with_xbox`
    pub fn identity_token(&self) -> String {
        format!("XBL3.0 x={};{}", self.uhs, self.token)
    }
}

/// Minecraft access token
#[derive(Clone, PartialEq, Eq)]
pub struct McToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl McToken {
    /// Token valid for `expires_in` seconds from now. A lifetime that does not
    /// fit a timestamp is a malformed response.
    pub fn new(access_token: String, expires_in: u64) -> Result<Self> {
        let expires_at = i64::try_from(expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::provider(
                    Stage::MinecraftLogin,
                    format!("expires_in out of range: {expires_in}"),
                )
            })?;

        Ok(Self {
            access_token,
            expires_at,
        })
    }
}

impl fmt::Debug for McToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
