use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bl_auth::{
    AuthClient, AuthConfig, AuthEvent, AuthOrchestrator, ConfigFileSessionStore, UserAction,
};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Microsoft account sign-in for the blocklaunch Minecraft launcher
#[derive(Parser, Debug)]
#[command(name = "blocklaunch", version, about)]
struct Cli {
    /// Launcher configuration file holding the saved session
    #[arg(long, global = true, env = "BLOCKLAUNCH_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with a device code
    Login,
    /// Renew the saved session without user interaction
    Refresh,
    /// Forget the saved session
    Logout,
    /// Show the saved session
    Status {
        /// Check the session against the services, signing out if it is no longer accepted
        #[arg(long)]
        refresh: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let auth = build_orchestrator(cli.config).await?;

    match cli.command {
        Command::Login => login(&auth).await,
        Command::Refresh => {
            let username = auth
                .refresh_and_authenticate()
                .await
                .context("Silent sign-in failed, run `blocklaunch login`")?;
            println!("Logged in as: {}", username);
            Ok(())
        }
        Command::Logout => {
            auth.logout().await.context("Failed to clear the saved session")?;
            println!("Signed out");
            Ok(())
        }
        Command::Status { refresh } => status(&auth, refresh).await,
    }
}

async fn build_orchestrator(config: Option<PathBuf>) -> Result<AuthOrchestrator> {
    let config_path = match config {
        Some(path) => path,
        None => ConfigFileSessionStore::default_config_path()?,
    };
    let store = ConfigFileSessionStore::new(&config_path)
        .await
        .with_context(|| format!("Failed to open {}", config_path.display()))?;

    let client = AuthClient::new(AuthConfig::production()?)?;
    Ok(AuthOrchestrator::new(client, Arc::new(store)).await)
}

async fn login(auth: &AuthOrchestrator) -> Result<()> {
    let events = auth.subscribe();
    let mut sign_in = auth.spawn_authenticate();
    let prompts = tokio::spawn(print_prompts(events));

    let result = tokio::select! {
        joined = &mut sign_in => joined?,
        _ = tokio::signal::ctrl_c() => {
            auth.cancel();
            sign_in.await?
        }
    };
    // Every attempt ends with SignedIn or Failed, which stops the printer
    let _ = prompts.await;

    let username = result.context("Sign-in failed")?;
    println!("Logged in as: {}", username);
    Ok(())
}

async fn print_prompts(mut events: broadcast::Receiver<AuthEvent>) {
    loop {
        match events.recv().await {
            Ok(AuthEvent::DeviceCode(prompt)) => {
                println!(
                    "To sign in, open {} and enter the code {}",
                    prompt.verification_uri, prompt.user_code
                );
                println!(
                    "The code expires in {} minutes",
                    prompt.expires_in.as_secs().div_ceil(60)
                );
            }
            Ok(AuthEvent::StageStarted(stage)) => info!("{}", stage),
            Ok(AuthEvent::SessionNotSaved { message }) => {
                eprintln!("Warning: the session could not be saved: {message}");
                eprintln!("You will need to sign in again next time");
            }
            Ok(AuthEvent::SignedIn { .. } | AuthEvent::Failed { .. }) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn status(auth: &AuthOrchestrator, refresh: bool) -> Result<()> {
    let Some(session) = auth.current_session() else {
        println!("Not signed in");
        return Ok(());
    };

    if refresh {
        if let Err(err) = auth.refresh_and_authenticate().await {
            if err.action() == UserAction::SignInAgain {
                warn!("Saved session is no longer accepted: {}", err);
                auth.logout().await?;
                println!("Not signed in (saved session expired)");
                return Ok(());
            }
            return Err(err).context("Could not validate the saved session");
        }
    }

    let session = auth.current_session().unwrap_or(session);
    println!("Signed in as {} ({})", session.username, session.account_id.hyphenated());
    Ok(())
}
