//! Non-interactive credential login for the authorization endpoint
//!
//! Replaces the browser step of the Authorization Code flow: loads the
//! provider's login page, submits username and password through its form,
//! and follows redirects by hand until one points at the client's redirect
//! URI. The resulting callback URL is handed to
//! [`AuthCodeClient::complete`](crate::pkce_client::AuthCodeClient::complete)
//! exactly like a URL pasted from a browser.
//!
//! Intended for demo realms and test automation. The session cookie jar
//! lives only as long as the [`FormLogin`].

use std::fmt;
use std::time::Duration;

use regex::Regex;
use reqwest::header::LOCATION;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ClientError;
use crate::pkce_client::invalid_url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 10;

/// Username and password submitted to the login form
#[derive(Clone)]
pub struct Credentials {
    /// Login name
    pub username: String,
    /// Password, never logged
    pub password: SecretString,
}

impl Credentials {
    /// Bundle a username and password
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A login form scraped from the provider's page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// Absolute URL the form posts to
    pub action: Url,
    /// Named inputs with their initial values, in document order
    pub fields: Vec<(String, String)>,
}

impl LoginForm {
    /// Set `name` to `value`, replacing an existing input of that name
    pub fn set(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }
}

/// Extract the first `<form>` and its named `<input>` elements
///
/// # Errors
///
/// Returns [`ClientError::LoginFailed`] if the page has no form with an
/// `action`, or [`ClientError::InvalidUrl`] if the action does not resolve
/// against `page_url`.
pub fn parse_login_form(html: &str, page_url: &Url) -> Result<LoginForm, ClientError> {
    let form_re = pattern(r#"(?is)<form\b([^>]*)>(.*?)(?:</form>|\z)"#)?;
    let input_re = pattern(r#"(?is)<input\b([^>]*)>"#)?;

    let form = form_re
        .captures_iter(html)
        .find_map(|caps| {
            let attrs = caps.get(1)?.as_str();
            let action = attribute(attrs, "action")?;
            Some((action, caps.get(2).map_or("", |m| m.as_str())))
        })
        .ok_or_else(|| ClientError::LoginFailed("no login form on the authorization page".into()))?;

    let (action, body) = form;
    let action = page_url
        .join(&unescape(&action))
        .map_err(|e| invalid_url("login form action", &e))?;

    let fields = input_re
        .captures_iter(body)
        .filter_map(|caps| {
            let attrs = caps.get(1)?.as_str();
            let name = attribute(attrs, "name")?;
            let value = attribute(attrs, "value").unwrap_or_default();
            Some((unescape(&name), unescape(&value)))
        })
        .collect();

    Ok(LoginForm { action, fields })
}

/// Headless driver for the provider's login page
#[derive(Debug, Clone)]
pub struct FormLogin {
    http_client: reqwest::Client,
    redirect_uri: Url,
}

impl FormLogin {
    /// Driver that stops at `redirect_uri`
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if `redirect_uri` does not parse,
    /// or [`ClientError::Transport`] if the HTTP client cannot be built.
    pub fn new(redirect_uri: &str) -> Result<Self, ClientError> {
        let redirect_uri = Url::parse(redirect_uri).map_err(|e| invalid_url("redirect URI", &e))?;

        // Redirects are followed by hand so the callback is never requested
        let http_client = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            redirect_uri,
        })
    }

    /// Sign in at `authorization_url` and return the callback URL
    ///
    /// An existing provider session that redirects straight to the
    /// callback skips the form.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] if a request fails
    /// - [`ClientError::LoginFailed`] if there is no form, the provider
    ///   answers the submission with another page (typically rejected
    ///   credentials), or redirects do not reach the callback
    pub async fn run(
        &self,
        authorization_url: &Url,
        credentials: &Credentials,
    ) -> Result<Url, ClientError> {
        let response = self.get(authorization_url.clone()).await?;
        let page = match self.follow(response).await? {
            Step::Callback(url) => {
                info!("Provider session reused, no login form needed");
                return Ok(url);
            }
            Step::Page(page) => page,
        };

        let page_url = page.url().clone();
        let html = page
            .text()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let mut form = parse_login_form(&html, &page_url)?;
        form.set("username", &credentials.username);
        form.set("password", credentials.password.expose_secret());

        debug!(action = %form.action, fields = form.fields.len(), "Submitting login form");
        let response = self
            .http_client
            .post(form.action.clone())
            .form(&form.fields)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        match self.follow(response).await? {
            Step::Callback(url) => {
                info!(username = %credentials.username, "Credential login complete");
                Ok(url)
            }
            Step::Page(page) => {
                warn!(
                    username = %credentials.username,
                    status = page.status().as_u16(),
                    "Login form submission did not redirect to the client"
                );
                Err(ClientError::LoginFailed(format!(
                    "provider answered with status {} instead of redirecting; check the credentials",
                    page.status().as_u16()
                )))
            }
        }
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, ClientError> {
        self.http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    /// Follow redirects until the callback or a non-redirect response
    async fn follow(&self, mut response: reqwest::Response) -> Result<Step, ClientError> {
        for _ in 0..=MAX_REDIRECTS {
            if !response.status().is_redirection() {
                return Ok(Step::Page(response));
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return Ok(Step::Page(response));
            };

            let next = response
                .url()
                .join(location)
                .map_err(|e| invalid_url("redirect location", &e))?;

            if self.is_callback(&next) {
                return Ok(Step::Callback(next));
            }

            debug!(location = %next.path(), "Following redirect");
            response = self.get(next).await?;
        }

        Err(ClientError::LoginFailed(format!(
            "more than {MAX_REDIRECTS} redirects without reaching the callback"
        )))
    }

    fn is_callback(&self, url: &Url) -> bool {
        url.origin() == self.redirect_uri.origin() && url.path() == self.redirect_uri.path()
    }
}

enum Step {
    Callback(Url),
    Page(reqwest::Response),
}

fn pattern(source: &str) -> Result<Regex, ClientError> {
    Regex::new(source).map_err(|e| ClientError::LoginFailed(e.to_string()))
}

/// Value of a quoted attribute, case-insensitive on the name
fn attribute(attrs: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r#"(?i)(?:^|\s){}\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
        regex::escape(name)
    ))
    .ok()?;
    let caps = re.captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

fn unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
