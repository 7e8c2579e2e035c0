//! CLI entry point for freshtoken.

pub mod session;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// freshtoken CLI
#[derive(Parser, Debug)]
#[command(name = "freshtoken", version, about = "Inspect and refresh bearer tokens")]
pub struct Cli {
    /// Config file (defaults to ~/.freshtoken/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding stored entries (defaults to ~/.freshtoken)
    #[arg(long, global = true)]
    pub storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a token and print its claims and expiry
    Inspect(InspectArgs),
    /// Show the stored token
    Status,
    /// Store a token as the current session
    SignIn(SignInArgs),
    /// Remove the stored token and identity entries
    SignOut,
    /// Run one refresh exchange against the configured endpoint
    Refresh(RefreshArgs),
    /// Keep the stored token fresh and print session events
    Watch(RefreshArgs),
}

/// Arguments for `freshtoken inspect`.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Token to decode
    pub token: String,
}

/// Arguments for `freshtoken sign-in`.
#[derive(Parser, Debug)]
pub struct SignInArgs {
    /// Bearer token issued by the server
    pub token: String,
}

/// Arguments shared by commands that talk to the refresh endpoint.
#[derive(Parser, Debug)]
pub struct RefreshArgs {
    /// Refresh endpoint, overriding the config
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Refresh cookie as a Set-Cookie value, e.g. "refresh_token=...; Path=/"
    #[arg(short, long)]
    pub cookie: Option<String>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inspect() {
        let cli = Cli::try_parse_from(["freshtoken", "inspect", "a.b.c"]).unwrap();
        match cli.command {
            Commands::Inspect(args) => assert_eq!(args.token, "a.b.c"),
            other => panic!("expected Inspect, got {other:?}"),
        }
    }

    #[test]
    fn parse_refresh_with_options() {
        let cli = Cli::try_parse_from([
            "freshtoken",
            "refresh",
            "-e",
            "https://api.example.com/auth/refresh",
            "--cookie",
            "refresh_token=abc",
        ])
        .unwrap();
        match cli.command {
            Commands::Refresh(args) => {
                assert_eq!(
                    args.endpoint.as_deref(),
                    Some("https://api.example.com/auth/refresh")
                );
                assert_eq!(args.cookie.as_deref(), Some("refresh_token=abc"));
            }
            other => panic!("expected Refresh, got {other:?}"),
        }
    }

    #[test]
    fn parse_global_paths_after_subcommand() {
        let cli = Cli::try_parse_from([
            "freshtoken",
            "watch",
            "--storage-dir",
            "/tmp/ft",
            "--config",
            "/tmp/ft/config.toml",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Watch(_)));
        assert_eq!(cli.storage_dir, Some(PathBuf::from("/tmp/ft")));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ft/config.toml")));
    }

    #[test]
    fn parse_sign_in_and_out() {
        let cli = Cli::try_parse_from(["freshtoken", "sign-in", "a.b.c"]).unwrap();
        assert!(matches!(cli.command, Commands::SignIn(ref args) if args.token == "a.b.c"));
        let cli = Cli::try_parse_from(["freshtoken", "sign-out"]).unwrap();
        assert!(matches!(cli.command, Commands::SignOut));
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["freshtoken"]).is_err());
    }

    #[test]
    fn parse_inspect_missing_token_is_error() {
        assert!(Cli::try_parse_from(["freshtoken", "inspect"]).is_err());
    }
}
