use std::time::Duration;

use url::Url;

use crate::errors::Result;

/// Microsoft, Xbox Live and Minecraft Services endpoints
pub mod endpoints {
    pub const MS_DEVICE_CODE: &str =
        "https://login.microsoftonline.com/common/oauth2/v2.0/devicecode";
    pub const MS_TOKEN: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
    pub const XBL_AUTHENTICATE: &str = "https://user.auth.xboxlive.com/user/authenticate";
    pub const XSTS_AUTHORIZE: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
    pub const MC_LOGIN: &str = "https://api.minecraftservices.com/authentication/login_with_xbox";
    pub const MC_PROFILE: &str = "https://api.minecraftservices.com/minecraft/profile";
}

/// Azure application registered for the device code flow
pub const CLIENT_ID: &str = "031fb156-0927-4ff1-9e7e-0c5de9bfa474";

/// Scope requested at device code issuance and on refresh
pub const SCOPE: &str = "XboxLive.Signin offline_access";

/// Grant type for polling the token endpoint with a device code
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Relying parties
pub const RP_XBOXLIVE_AUTH: &str = "http://auth.xboxlive.com";
pub const RP_MINECRAFT: &str = "rp://api.minecraftservices.com/";

/// Endpoint set used by [`AuthClient`](crate::AuthClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub device_code: Url,
    pub token: Url,
    pub xbl_authenticate: Url,
    pub xsts_authorize: Url,
    pub mc_login: Url,
    pub mc_profile: Url,
}

impl Endpoints {
    /// Production endpoints
    pub fn production() -> Result<Self> {
        Ok(Self {
            device_code: Url::parse(endpoints::MS_DEVICE_CODE)?,
            token: Url::parse(endpoints::MS_TOKEN)?,
            xbl_authenticate: Url::parse(endpoints::XBL_AUTHENTICATE)?,
            xsts_authorize: Url::parse(endpoints::XSTS_AUTHORIZE)?,
            mc_login: Url::parse(endpoints::MC_LOGIN)?,
            mc_profile: Url::parse(endpoints::MC_PROFILE)?,
        })
    }

    /// Route every endpoint to the same path under a single base URL.
    ///
    /// Handy for local proxies and mock servers.
    pub fn at_base(base: &str) -> Result<Self> {
        let base = Url::parse(base)?;
        let production = Self::production()?;

        Ok(Self {
            device_code: base.join(production.device_code.path())?,
            token: base.join(production.token.path())?,
            xbl_authenticate: base.join(production.xbl_authenticate.path())?,
            xsts_authorize: base.join(production.xsts_authorize.path())?,
            mc_login: base.join(production.mc_login.path())?,
            mc_profile: base.join(production.mc_profile.path())?,
        })
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Device code polling policy
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Interval used when the provider does not send one
    pub default_interval: Duration,
    /// Lifetime used when the provider does not send `expires_in`
    pub default_expires_in: Duration,
    /// Added to the interval on every `slow_down`
    pub slow_down_increment: Duration,
    /// Lower bound for any provider-supplied interval
    pub min_interval: Duration,
    /// Upper bound for the interval, provider-supplied or grown by `slow_down`
    pub max_interval: Duration,
    /// Upper bound for a provider-supplied challenge lifetime
    pub max_expires_in: Duration,
    /// Consecutive transport failures tolerated before giving up
    pub transient_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(5),
            default_expires_in: Duration::from_secs(900),
            slow_down_increment: Duration::from_secs(5),
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            max_expires_in: Duration::from_secs(3600),
            transient_retries: 3,
        }
    }
}

impl PollPolicy {
    /// Challenge lifetime and interval from the provider's seconds, defaulted
    /// and clamped to this policy's bounds
    pub fn bounded(&self, expires_in: Option<u64>, interval: Option<u64>) -> (Duration, Duration) {
        let expires_in = expires_in
            .map(Duration::from_secs)
            .unwrap_or(self.default_expires_in)
            .min(self.max_expires_in);
        let interval = interval
            .map(Duration::from_secs)
            .unwrap_or(self.default_interval)
            .clamp(self.min_interval, self.max_interval);
        (expires_in, interval)
    }
}

/// Configuration for [`AuthClient`](crate::AuthClient)
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth client ID
    pub client_id: String,

    /// Scope sent with device code and refresh requests
    pub scope: String,

    /// Service endpoints
    pub endpoints: Endpoints,

    /// HTTP client timeouts
    pub http_timeouts: HttpTimeouts,

    /// Custom user agent (optional)
    pub user_agent: Option<String>,

    /// Device code polling policy
    pub poll: PollPolicy,
}

impl AuthConfig {
    /// Production configuration with the launcher's client ID
    pub fn production() -> Result<Self> {
        Ok(Self::with_endpoints(Endpoints::production()?))
    }

    /// Production client identity talking to the given endpoints
    pub fn with_endpoints(endpoints: Endpoints) -> Self {
        Self {
            client_id: CLIENT_ID.to_string(),
            scope: SCOPE.to_string(),
            endpoints,
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some(format!("blocklaunch/{}", env!("CARGO_PKG_VERSION"))),
            poll: PollPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_endpoints_match_literals() {
        let endpoints = Endpoints::production().unwrap();
        assert_eq!(endpoints.token.as_str(), endpoints::MS_TOKEN);
        assert_eq!(endpoints.mc_profile.as_str(), endpoints::MC_PROFILE);
    }

    #[test]
    fn provider_timing_is_clamped() {
        let policy = PollPolicy::default();

        assert_eq!(
            policy.bounded(Some(u64::MAX), Some(u64::MAX)),
            (policy.max_expires_in, policy.max_interval)
        );
        assert_eq!(
            policy.bounded(Some(600), Some(0)),
            (Duration::from_secs(600), policy.min_interval)
        );
        assert_eq!(
            policy.bounded(None, None),
            (Duration::from_secs(900), Duration::from_secs(5))
        );
    }

    #[test]
    fn at_base_keeps_paths() {
        let endpoints = Endpoints::at_base("http://127.0.0.1:4000").unwrap();
        assert_eq!(
            endpoints.device_code.as_str(),
            "http://127.0.0.1:4000/common/oauth2/v2.0/devicecode"
        );
        assert_eq!(
            endpoints.xsts_authorize.as_str(),
            "http://127.0.0.1:4000/xsts/authorize"
        );
        assert_eq!(
            endpoints.mc_login.as_str(),
            "http://127.0.0.1:4000/authentication/login_with_xbox"
        );
    }
}
