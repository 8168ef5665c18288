//! Microsoft account sign-in for the blocklaunch Minecraft launcher
//!
//! This crate turns a Microsoft account into a launch-ready Minecraft session
//! through the device code flow and keeps that session alive across restarts
//! with the saved refresh token.
//!
//! # Authentication Flow
//!
//! 1. Device code issuance by the Microsoft identity platform
//! 2. Polling the token endpoint while the user signs in on another device
//! 3. Xbox Live authentication
//! 4. XSTS authorization
//! 5. Minecraft Services login
//! 6. Profile retrieval
//!
//! The silent path swaps steps 1-2 for a refresh token grant.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bl_auth::{AuthClient, AuthConfig, AuthEvent, AuthOrchestrator, ConfigFileSessionStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = AuthClient::new(AuthConfig::production()?)?;
//!     let store = ConfigFileSessionStore::new(ConfigFileSessionStore::default_config_path()?).await?;
//!     let auth = AuthOrchestrator::new(client, Arc::new(store)).await;
//!
//!     let mut events = auth.subscribe();
//!     let sign_in = auth.spawn_authenticate();
//!
//!     while let Ok(event) = events.recv().await {
//!         if let AuthEvent::DeviceCode(prompt) = event {
//!             println!("Open {} and enter {}", prompt.verification_uri, prompt.user_code);
//!             break;
//!         }
//!     }
//!
//!     let username = sign_in.await??;
//!     println!("Logged in as: {}", username);
//!     Ok(())
//! }
//! ```
//!
//! # Session Storage
//!
//! Sessions are persisted through the [`SessionStore`] trait.
//!
//! ```
//! use bl_auth::{AccountId, MemorySessionStore, Session, SessionStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = MemorySessionStore::new();
//! let session = Session {
//!     username: "Player".to_string(),
//!     account_id: AccountId::parse("069a79f444e94726a5befca90e38aaf5").unwrap(),
//!     game_access_token: "mc".to_string(),
//!     identity_refresh_token: "refresh".to_string(),
//! };
//! store.save(&session).await?;
//!
//! if let Some(session) = store.load().await {
//!     println!("Loaded session for: {}", session.username);
//! }
//! # Ok(())
//! # }
//! # tokio_test::block_on(example()).unwrap();
//! ```
//!
//! [`ConfigFileSessionStore`] keeps the session inside the launcher's JSON
//! configuration file and leaves the other keys alone.
//!
//! # Important Notes
//!
//! - Tokens are never logged and `Debug` output redacts them
//! - The refresh token only ever goes to the Microsoft token endpoint
//! - Only the refresh token makes a session restorable; the Minecraft token
//!   expires after about a day

pub mod client;
pub mod config;
pub mod device_code;
pub mod errors;
pub mod file_store;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod store;

// Re-export main types
pub use client::AuthClient;
pub use config::{AuthConfig, Endpoints, HttpTimeouts, PollPolicy};
pub use device_code::{
    DeviceCodeChallenge, DeviceCodePrompt, DeviceTokenSource, PollResponse, PollState, TokenPoller,
};
pub use errors::{AuthError, ErrorKind, RefreshError, Result, Stage, UserAction, XstsError};
pub use file_store::ConfigFileSessionStore;
pub use models::McProfile;
pub use orchestrator::{AuthEvent, AuthOrchestrator};
pub use session::{AccountId, McToken, ProviderTokens, Session, XblToken, XstsToken};
pub use store::{MemorySessionStore, SessionStore};
