//! Command-line interface definition

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands;
use crate::error::CliResult;

/// Headless OAuth 2.0 client for the study realm
///
/// Runs the Authorization Code flow with PKCE against the configured realm
/// and calls the protected API with the resulting access token.
#[derive(Parser, Debug)]
#[command(name = "oauth-study", version, about, author)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (.toml, .yaml or .json); environment variables override it
    #[arg(short, long, global = true, env = "CLIENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all log output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in (headless with credentials, or through a browser) and print the token set
    Login(LoginArgs),

    /// Call the protected API with an access token
    Call(CallArgs),

    /// Print a token's payload without verifying it
    Decode(DecodeArgs),
}

/// Arguments for `login`
#[derive(clap::Args, Debug)]
pub struct LoginArgs {
    /// Call the protected API once the tokens are obtained
    #[arg(long)]
    pub call: bool,

    /// Resolve endpoints from the provider's discovery document
    #[arg(long)]
    pub discover: bool,

    /// Print the provider logout URL after login
    #[arg(long)]
    pub logout_url: bool,

    /// Sign in without a browser by submitting the provider's login form
    #[arg(short, long, env = "OIDC_USERNAME", requires = "password")]
    pub username: Option<String>,

    /// Password for --username
    #[arg(short, long, env = "OIDC_PASSWORD", hide_env_values = true, requires = "username")]
    pub password: Option<String>,
}

/// Arguments for `call`
#[derive(clap::Args, Debug)]
pub struct CallArgs {
    /// Access token to send
    #[arg(short, long, env = "ACCESS_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Endpoint to call (defaults to PROTECTED_API_URL)
    #[arg(short, long)]
    pub url: Option<String>,
}

/// Arguments for `decode`
#[derive(clap::Args, Debug)]
pub struct DecodeArgs {
    /// Compact JWT to decode
    #[arg(short, long, env = "ACCESS_TOKEN", hide_env_values = true)]
    pub token: String,
}

impl Cli {
    /// Execute the selected command
    ///
    /// # Errors
    ///
    /// Returns the command's [`CliError`](crate::error::CliError).
    pub async fn execute(self) -> CliResult<()> {
        self.init_tracing();

        let config = self.config.as_deref();
        match self.command {
            Command::Login(args) => commands::login(config, &args).await,
            Command::Call(args) => commands::call(config, &args).await,
            Command::Decode(args) => commands::decode(&args),
        }
    }

    fn default_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Logs go to stderr so stdout stays machine readable; `RUST_LOG` wins
    /// over the flags
    fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_filter()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_parsing() {
        let cli = Cli::try_parse_from(["oauth-study", "login", "--call", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Login(args) => {
                assert!(args.call);
                assert!(!args.discover);
            }
            other => panic!("expected login, got {other:?}"),
        }
    }

    #[test]
    fn test_call_parsing() {
        let cli = Cli::try_parse_from([
            "oauth-study",
            "--config",
            "client.toml",
            "call",
            "--token",
            "abc",
            "--url",
            "http://localhost:4000/api/hello",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("client.toml")));
        match cli.command {
            Command::Call(args) => {
                assert_eq!(args.token, "abc");
                assert_eq!(args.url.as_deref(), Some("http://localhost:4000/api/hello"));
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn test_headless_login_parsing() {
        let cli = Cli::try_parse_from([
            "oauth-study",
            "login",
            "--username",
            "demo",
            "--password",
            "demo",
            "--call",
        ])
        .unwrap();
        match cli.command {
            Command::Login(args) => {
                assert_eq!(args.username.as_deref(), Some("demo"));
                assert_eq!(args.password.as_deref(), Some("demo"));
            }
            other => panic!("expected login, got {other:?}"),
        }
    }

    #[test]
    fn test_default_filter_levels() {
        let parse = |args: &[&str]| {
            Cli::try_parse_from(args.iter().copied().chain(["decode", "--token", "x"])).unwrap()
        };
        assert_eq!(parse(&["oauth-study"]).default_filter(), "info");
        assert_eq!(parse(&["oauth-study", "-v"]).default_filter(), "debug");
        assert_eq!(parse(&["oauth-study", "-vvv"]).default_filter(), "trace");
        assert_eq!(parse(&["oauth-study", "-q"]).default_filter(), "error");
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["oauth-study", "-q", "-v", "decode", "--token", "x"]).is_err());
    }
}
