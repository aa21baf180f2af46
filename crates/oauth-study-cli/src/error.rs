//! CLI errors and their display

use oauth_study_auth::{ClientError, ConfigError, MalformedTokenError};
use thiserror::Error;

/// Result type for CLI commands
pub type CliResult<T> = Result<T, CliError>;

/// Anything a command can fail with
#[derive(Debug, Error)]
pub enum CliError {
    /// Settings could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Login or API call failed
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Token could not be decoded
    #[error(transparent)]
    Token(#[from] MalformedTokenError),

    /// Terminal I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output could not be serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protected API answered with a non-success status
    #[error("protected API returned status {0}")]
    ApiStatus(u16),
}

impl CliError {
    fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check KEYCLOAK_URL, REALM and CLIENT_ID, or pass --config"),
            Self::Client(ClientError::StateMismatch) => {
                Some("Paste the redirect URL from this login attempt, not an older one")
            }
            Self::Client(ClientError::LoginFailed(_)) => {
                Some("Check OIDC_USERNAME and OIDC_PASSWORD, or omit them to sign in through a browser")
            }
            Self::Client(ClientError::Transport(_) | ClientError::Discovery(_)) => {
                Some("Is the identity provider running and reachable?")
            }
            Self::ApiStatus(401) => Some("The token was rejected; log in again"),
            Self::ApiStatus(403) => Some("The user lacks the role or scope this endpoint requires"),
            _ => None,
        }
    }
}

/// Print `error` to stderr and return the process exit code
pub fn display_error(error: &CliError) -> i32 {
    eprintln!("error: {error}");
    if let Some(hint) = error.hint() {
        eprintln!("  hint: {hint}");
    }
    1
}
