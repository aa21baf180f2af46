//! Command implementations

use std::io::Write as _;
use std::path::Path;

use oauth_study_auth::claims::decode_unverified;
use oauth_study_auth::config::ClientSettings;
use oauth_study_auth::form_login::{Credentials, FormLogin};
use oauth_study_auth::pkce_client::{ApiResponse, AuthCodeClient, ClientEndpoints, TokenSet};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::cli::{CallArgs, DecodeArgs, LoginArgs};
use crate::error::{CliError, CliResult};

/// Authorization Code + PKCE login
///
/// With credentials the provider's login form is submitted directly;
/// otherwise the user signs in through a browser and pastes the redirect.
pub async fn login(config: Option<&Path>, args: &LoginArgs) -> CliResult<()> {
    let settings = ClientSettings::load(config)?;
    debug!(issuer = %settings.issuer(), client_id = %settings.client_id, "Client settings loaded");

    let client = if args.discover {
        AuthCodeClient::discover(&settings).await?
    } else {
        AuthCodeClient::new(&settings, ClientEndpoints::keycloak(&settings.issuer()))?
    };

    let pending = client.begin();
    let callback = match (&args.username, &args.password) {
        (Some(username), Some(password)) => {
            info!(username = %username, "Signing in with credentials");
            FormLogin::new(&settings.redirect_uri)?
                .run(&pending.url, &Credentials::new(username, password))
                .await?
                .to_string()
        }
        _ => prompt_for_callback(&pending.url).await?,
    };

    let tokens = client.complete(pending, callback.trim()).await?;
    info!(expires_at = ?tokens.expires_at, "Login complete");
    print_json(&token_set_json(&tokens))?;

    if args.call {
        let response = client
            .call_protected_api(&settings.protected_api_url, &tokens.access_token)
            .await?;
        report(response)?;
    }

    if args.logout_url {
        let hint = tokens.id_token.as_ref().map(|t| t.expose_secret().to_string());
        match client.end_session_url(hint.as_deref(), None) {
            Some(url) => eprintln!("Logout URL: {url}"),
            None => eprintln!("Provider has no end-session endpoint"),
        }
    }

    Ok(())
}

async fn prompt_for_callback(authorization_url: &url::Url) -> CliResult<String> {
    eprintln!("Open this URL in a browser and sign in:\n\n  {authorization_url}\n");
    eprint!("Paste the URL you were redirected to: ");
    std::io::stderr().flush()?;

    let mut callback = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut callback)
        .await?;
    Ok(callback)
}

/// Call the protected API with an existing token
pub async fn call(config: Option<&Path>, args: &CallArgs) -> CliResult<()> {
    let url = match &args.url {
        Some(url) => url.clone(),
        None => ClientSettings::load(config)?.protected_api_url,
    };

    let http = reqwest::Client::new();
    let response = oauth_study_auth::pkce_client::call_protected_api(&http, &url, &args.token).await?;
    report(response)
}

/// Print the unverified payload of a token
pub fn decode(args: &DecodeArgs) -> CliResult<()> {
    let payload = decode_unverified(&args.token)?;
    eprintln!("Signature NOT verified");
    print_json(&payload)
}

fn token_set_json(tokens: &TokenSet) -> Value {
    json!({
        "access_token": tokens.access_token.expose_secret(),
        "refresh_token": tokens.refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
        "id_token": tokens.id_token.as_ref().map(|t| t.expose_secret().to_string()),
        "token_type": tokens.token_type,
        "expires_at": tokens.expires_at.map(|at| at.to_rfc3339()),
        "scope": tokens.scopes.join(" "),
    })
}

fn report(response: ApiResponse) -> CliResult<()> {
    eprintln!("Protected API responded with status {}", response.status);
    print_json(&response.body)?;

    if (200..300).contains(&response.status) {
        Ok(())
    } else {
        Err(CliError::ApiStatus(response.status))
    }
}

fn print_json(value: &Value) -> CliResult<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
