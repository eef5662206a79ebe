use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kyc_client::{ApiClient, SessionContext, TokenStore};
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod engine;
mod verify;

use config::Config;

#[derive(Parser)]
#[command(
    name = "kyc",
    version,
    about = "KYC onboarding: account signup and liveness-checked selfie verification"
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account
    Signup(auth::SignupArgs),
    /// Log in and store the session tokens
    Login(auth::LoginArgs),
    /// Forget the stored session tokens
    Logout,
    /// Run the liveness check and submit the selfie
    Verify(verify::VerifyArgs),
    /// Show configuration and login state as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let ctx = Arc::new(
        SessionContext::with_store(TokenStore::new(&config.token_path))
            .context("failed to open token store")?,
    );
    let api = Arc::new(
        ApiClient::new(&config.api_url, Arc::clone(&ctx), config.request_timeout())
            .context("failed to build HTTP client")?
            .with_interceptor(Arc::new(auth::LoginRedirect)),
    );
    tracing::debug!(api_url = %config.api_url, "kyc starting");

    match cli.command {
        Command::Signup(args) => auth::signup(&api, args).await,
        Command::Login(args) => auth::login(&api, args).await,
        Command::Logout => auth::logout(&ctx),
        Command::Verify(args) => verify::run(&config, api, args).await,
        Command::Status => {
            let status = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "api_url": config.api_url,
                "logged_in": ctx.is_authenticated(),
                "token_path": config.token_path,
                "completion": config.completion,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}
