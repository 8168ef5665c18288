use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::config::{AuthConfig, DEVICE_CODE_GRANT, RP_MINECRAFT, RP_XBOXLIVE_AUTH};
use crate::device_code::{DeviceCodeChallenge, DeviceTokenSource, PollResponse};
use crate::errors::{AuthError, RefreshError, Result, Stage, XstsError, snippet};
use crate::models::*;
use crate::session::{McToken, ProviderTokens, XblToken, XstsToken};

const INVALID_GRANT: &str = "invalid_grant";

/// HTTP client for every stage of the Microsoft → Xbox → Minecraft chain
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: AuthConfig,
    http: Client,
}

impl AuthClient {
    /// Create a new authentication client
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or("blocklaunch"))
            .build()?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Ask the identity provider for a device code challenge
    #[instrument(skip(self))]
    pub async fn request_device_code(&self) -> Result<DeviceCodeChallenge> {
        debug!("Requesting device code");
        let response = self
            .http
            .post(self.config.endpoints.device_code.clone())
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: DeviceCodeResponse = serde_json::from_str(&body).unwrap_or_default();

        let (Some(device_code), Some(user_code), Some(verification_uri)) =
            (parsed.device_code, parsed.user_code, parsed.verification_uri)
        else {
            if status.is_server_error() {
                return Err(AuthError::http(Stage::DeviceCode, status, &body));
            }
            return Err(AuthError::provider(
                Stage::DeviceCode,
                format!("missing device code fields: {}", snippet(&body)),
            ));
        };

        let (expires_in, poll_interval) = self
            .config
            .poll
            .bounded(parsed.expires_in, parsed.interval);

        Ok(DeviceCodeChallenge {
            device_code,
            user_code,
            verification_uri,
            expires_at: Instant::now() + expires_in,
            poll_interval,
        })
    }

    /// Exchange a stored refresh token for fresh provider tokens.
    ///
    /// When the provider does not rotate the refresh token, the one passed in is
    /// kept.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_provider_token(&self, refresh_token: &str) -> Result<ProviderTokens> {
        debug!("Refreshing Microsoft access token");
        let response = self
            .http
            .post(self.config.endpoints.token.clone())
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: MsTokenResponse = parse_body(Stage::TokenRefresh, status, &body)?;

        if let Some(access_token) = parsed.access_token {
            return Ok(ProviderTokens {
                access_token,
                refresh_token: parsed
                    .refresh_token
                    .filter(|token| !token.is_empty())
                    .or_else(|| Some(refresh_token.to_string())),
            });
        }

        match parsed.error.as_deref() {
            Some(INVALID_GRANT) => Err(RefreshError::InvalidGrant {
                description: parsed.error_description,
            }
            .into()),
            Some(error) => Err(AuthError::provider(Stage::TokenRefresh, error)),
            None => Err(AuthError::http(Stage::TokenRefresh, status, &body)),
        }
    }

    /// Authenticate with Xbox Live
    #[instrument(skip(self, ms_access_token))]
    pub async fn xbl_authenticate(&self, ms_access_token: &str) -> Result<XblToken> {
        let request = XblAuthRequest {
            properties: XblAuthProperties {
                auth_method: "RPS".to_string(),
                site_name: "user.auth.xboxlive.com".to_string(),
                rps_ticket: format!("d={}", ms_access_token),
            },
            relying_party: RP_XBOXLIVE_AUTH.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authenticating with Xbox Live");
        let response = self
            .http
            .post(self.config.endpoints.xbl_authenticate.clone())
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        let xbl: XboxTokenResponse = read_json(Stage::XboxLive, response).await?;
        let token = xbl
            .token
            .ok_or_else(|| AuthError::provider(Stage::XboxLive, "response has no Token"))?;

        Ok(XblToken { token })
    }

    /// Authorize with XSTS for the Minecraft Services relying party
    #[instrument(skip(self, xbl_token))]
    pub async fn xsts_authorize(&self, xbl_token: &str) -> Result<XstsToken> {
        let request = XstsAuthRequest {
            properties: XstsAuthProperties {
                sandbox_id: "RETAIL".to_string(),
                user_tokens: vec![xbl_token.to_string()],
            },
            relying_party: RP_MINECRAFT.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authorizing with XSTS");
        let response = self
            .http
            .post(self.config.endpoints.xsts_authorize.clone())
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let body = response.text().await?;
            return match serde_json::from_str::<XstsErrorResponse>(&body) {
                Ok(error) => {
                    warn!(
                        xerr = error.xerr,
                        detail = error.message.as_deref().unwrap_or_default(),
                        redirect = error.redirect.as_deref().unwrap_or_default(),
                        "XSTS denied authorization"
                    );
                    Err(XstsError::from_xerr(error.xerr).into())
                }
                Err(_) => Err(AuthError::http(Stage::Xsts, StatusCode::UNAUTHORIZED, &body)),
            };
        }

        let xsts: XboxTokenResponse = read_json(Stage::Xsts, response).await?;
        let uhs = xsts
            .user_hash()
            .map(str::to_string)
            .ok_or_else(|| AuthError::provider(Stage::Xsts, "response has no user hash"))?;
        let token = xsts
            .token
            .ok_or_else(|| AuthError::provider(Stage::Xsts, "response has no Token"))?;

        Ok(XstsToken { token, uhs })
    }

    /// Login to Minecraft with XSTS token
    #[instrument(skip(self, xsts))]
    pub async fn mc_login(&self, xsts: &XstsToken) -> Result<McToken> {
        let request = McLoginRequest {
            identity_token: xsts.identity_token(),
        };

        debug!("Logging in to Minecraft Services");
        let response = self
            .http
            .post(self.config.endpoints.mc_login.clone())
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        let mc: McLoginResponse = read_json(Stage::MinecraftLogin, response).await?;
        let access_token = mc.access_token.ok_or_else(|| {
            AuthError::provider(Stage::MinecraftLogin, "response has no access_token")
        })?;

        McToken::new(access_token, mc.expires_in.unwrap_or(86_400))
    }

    /// Fetch Minecraft profile
    #[instrument(skip(self, mc_access_token))]
    pub async fn fetch_profile(&self, mc_access_token: &str) -> Result<McProfile> {
        debug!("Fetching Minecraft profile");
        let response = self
            .http
            .get(self.config.endpoints.mc_profile.clone())
            .header("Authorization", format!("Bearer {}", mc_access_token))
            .send()
            .await?;

        let status = response.status();

        // Valid identity without a Minecraft entitlement
        if status == StatusCode::NOT_FOUND {
            return Err(AuthError::MinecraftProfileNotFound);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::http(Stage::Profile, status, &body));
        }

        if let Ok(error) = serde_json::from_str::<McProfileError>(&body) {
            if error.error == "NOT_FOUND" {
                return Err(AuthError::MinecraftProfileNotFound);
            }
            warn!(
                error = %error.error,
                detail = error.error_message.as_deref().unwrap_or_default(),
                "Profile endpoint returned an error body"
            );
        }

        serde_json::from_str(&body).map_err(|_| {
            AuthError::provider(
                Stage::Profile,
                format!("response has no name/id: {}", snippet(&body)),
            )
        })
    }
}

#[async_trait::async_trait]
impl DeviceTokenSource for AuthClient {
    #[instrument(skip_all)]
    async fn poll_device_token(&self, device_code: &str) -> Result<PollResponse> {
        // Scope was consented at issuance and must not be resent here
        let response = self
            .http
            .post(self.config.endpoints.token.clone())
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", DEVICE_CODE_GRANT),
                ("client_id", self.config.client_id.as_str()),
                ("device_code", device_code),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: MsTokenResponse = parse_body(Stage::TokenPoll, status, &body)?;

        if let Some(access_token) = parsed.access_token {
            return Ok(PollResponse::Authorized(ProviderTokens {
                access_token,
                refresh_token: parsed.refresh_token.filter(|token| !token.is_empty()),
            }));
        }

        match parsed.error {
            Some(error) if error == "authorization_pending" => Ok(PollResponse::Pending),
            Some(error) if error == "slow_down" => Ok(PollResponse::SlowDown),
            Some(error) => Ok(PollResponse::Rejected {
                error,
                description: parsed.error_description,
            }),
            None => Err(AuthError::http(Stage::TokenPoll, status, &body)),
        }
    }
}

/// Decode a token endpoint body, which carries JSON for both 2xx and 4xx.
fn parse_body<T: DeserializeOwned>(stage: Stage, status: StatusCode, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|_| AuthError::http(stage, status, body))
}

/// Decode a JSON body from a successful response, reporting anything else with
/// a body snippet.
async fn read_json<T: DeserializeOwned>(stage: Stage, response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(AuthError::http(stage, status, &body));
    }

    serde_json::from_str(&body).map_err(|_| {
        AuthError::provider(stage, format!("unexpected response: {}", snippet(&body)))
    })
}
