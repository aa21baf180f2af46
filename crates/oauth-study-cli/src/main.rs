//! oauth-study CLI entry point
//!
//! Headless Authorization Code + PKCE client: prints the authorization URL,
//! reads the redirect back from the terminal and prints the token set.

mod cli;
mod commands;
mod error;

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    if let Err(e) = cli.execute().await {
        let exit_code = error::display_error(&e);
        std::process::exit(exit_code);
    }
}
