#![allow(dead_code)]

use std::time::Duration;

use bl_auth::{AccountId, AuthClient, AuthConfig, Endpoints, Session};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DEVICE_CODE_PATH: &str = "/common/oauth2/v2.0/devicecode";
pub const TOKEN_PATH: &str = "/common/oauth2/v2.0/token";
pub const XBL_PATH: &str = "/user/authenticate";
pub const XSTS_PATH: &str = "/xsts/authorize";
pub const MC_LOGIN_PATH: &str = "/authentication/login_with_xbox";
pub const PROFILE_PATH: &str = "/minecraft/profile";

pub const PROFILE_ID: &str = "069a79f444e94726a5befca90e38aaf5";

pub fn test_config(server: &MockServer) -> AuthConfig {
    test_config_with_timeout(server, Duration::from_secs(5))
}

pub fn test_config_with_timeout(server: &MockServer, request_timeout: Duration) -> AuthConfig {
    let mut config = AuthConfig::with_endpoints(Endpoints::at_base(&server.uri()).unwrap());
    config.http_timeouts.request = request_timeout;
    config
}

pub fn test_client(server: &MockServer) -> AuthClient {
    AuthClient::new(test_config(server)).unwrap()
}

pub fn saved_session(refresh_token: &str) -> Session {
    Session {
        username: "Steve".to_string(),
        account_id: AccountId::parse(PROFILE_ID).unwrap(),
        game_access_token: "mc-old".to_string(),
        identity_refresh_token: refresh_token.to_string(),
    }
}

pub async fn mount_device_code(server: &MockServer, interval: u64, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path(DEVICE_CODE_PATH))
        .and(body_string_contains("scope="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "D1",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://a/b",
            "expires_in": expires_in,
            "interval": interval
        })))
        .expect(1)
        .named("device code")
        .mount(server)
        .await;
}

pub async fn mount_pending(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("device_code=D1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_pending",
            "error_description": "AADSTS70016: pending"
        })))
        .up_to_n_times(times)
        .expect(times)
        .named("token poll pending")
        .mount(server)
        .await;
}

pub async fn mount_poll_success(server: &MockServer, access_token: &str, refresh_token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("device_code=D1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": access_token,
            "refresh_token": refresh_token,
            "expires_in": 3600
        })))
        .expect(1)
        .named("token poll success")
        .mount(server)
        .await;
}

/// XBL → XSTS → login_with_xbox → profile, accepting `ms_access_token`
pub async fn mount_chain(server: &MockServer, ms_access_token: &str) {
    Mock::given(method("POST"))
        .and(path(XBL_PATH))
        .and(body_partial_json(json!({
            "Properties": { "AuthMethod": "RPS", "RpsTicket": format!("d={ms_access_token}") },
            "RelyingParty": "http://auth.xboxlive.com"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Token": "xbl-token",
            "DisplayClaims": { "xui": [ { "uhs": "uhs-1" } ] }
        })))
        .expect(1)
        .named("xbl")
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(XSTS_PATH))
        .and(body_partial_json(json!({
            "Properties": { "SandboxId": "RETAIL", "UserTokens": ["xbl-token"] },
            "RelyingParty": "rp://api.minecraftservices.com/"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Token": "xsts-token",
            "DisplayClaims": { "xui": [ { "uhs": "uhs-1" } ] }
        })))
        .expect(1)
        .named("xsts")
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(MC_LOGIN_PATH))
        .and(body_json(json!({ "identityToken": "XBL3.0 x=uhs-1;xsts-token" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "username": "some-guid",
            "access_token": "mc-token",
            "token_type": "Bearer",
            "expires_in": 86400
        })))
        .expect(1)
        .named("minecraft login")
        .mount(server)
        .await;

    mount_profile(server).await;
}

pub async fn mount_profile(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .and(header("authorization", "Bearer mc-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": PROFILE_ID,
            "name": "Steve",
            "skins": [],
            "capes": []
        })))
        .expect(1)
        .named("profile")
        .mount(server)
        .await;
}
