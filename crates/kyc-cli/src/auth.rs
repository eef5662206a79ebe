//! `kyc signup`, `kyc login`, `kyc logout`.

use std::io::{self, BufRead};

use anyhow::{bail, Context, Result};
use clap::Args;
use kyc_client::{
    ApiClient, AuthInterceptor, ClearCredentials, Gender, LoginRequest, SessionContext,
    SignupRequest,
};

#[derive(Args, Debug)]
pub struct SignupArgs {
    #[arg(long)]
    pub full_name: String,
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub email: String,
    /// Read from stdin if omitted.
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub whatsapp: String,
    /// male, female or other
    #[arg(long, default_value = "male")]
    pub gender: Gender,
    #[arg(long)]
    pub address: String,
    #[arg(long)]
    pub country: String,
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    #[arg(long)]
    pub email: String,
    /// Read from stdin if omitted.
    #[arg(long)]
    pub password: Option<String>,
}

/// 401 hook for the CLI: drop the tokens and tell the user to log in again.
pub struct LoginRedirect;

impl AuthInterceptor for LoginRedirect {
    fn on_unauthorized(&self, ctx: &SessionContext, path: &str) {
        ClearCredentials.on_unauthorized(ctx, path);
        eprintln!("Session expired. Run `kyc login` to sign in again.");
    }
}

pub async fn signup(api: &ApiClient, args: SignupArgs) -> Result<()> {
    let password = password_or_stdin(args.password)?;
    let req = SignupRequest {
        username: args.username,
        email: args.email,
        password,
        full_name: args.full_name,
        whatsapp: args.whatsapp,
        gender: args.gender,
        address: args.address,
        country: args.country,
    };

    api.signup(&req).await.context("Signup failed. Please try again.")?;
    println!("Signup successful! Please login.");
    Ok(())
}

pub async fn login(api: &ApiClient, args: LoginArgs) -> Result<()> {
    let password = password_or_stdin(args.password)?;
    let req = LoginRequest {
        email: args.email,
        password,
    };

    let resp = api
        .login(&req)
        .await
        .context("Login failed. Please check your credentials.")?;
    if resp.access.is_none() {
        bail!("Login failed: the server did not return an access token");
    }
    println!("Login successful!");
    Ok(())
}

pub fn logout(ctx: &SessionContext) -> Result<()> {
    ctx.clear().context("failed to clear stored credentials")?;
    println!("Logged out.");
    Ok(())
}

fn password_or_stdin(password: Option<String>) -> Result<String> {
    if let Some(p) = password {
        return Ok(p);
    }
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password is required");
    }
    Ok(password)
}
