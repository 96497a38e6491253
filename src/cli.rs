//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OAuth 2.0 authorization server proxy for remote MCP servers
#[derive(Parser, Debug)]
#[command(name = "mcp-remote-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_REMOTE_AUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_REMOTE_AUTH_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MCP_REMOTE_AUTH_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MCP_REMOTE_AUTH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_REMOTE_AUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    Serve,

    /// Inspect or maintain the token store
    #[command(subcommand)]
    Store(StoreCommand),

    /// Print a random secret suitable for `storage.secret`
    GenerateSecret,
}

/// Token store subcommands
#[derive(Subcommand, Debug)]
pub enum StoreCommand {
    /// Show record counts per collection
    Stats,

    /// Print the live access token with the furthest expiry
    LatestToken,

    /// Remove every expired record
    PurgeExpired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["mcp-remote-auth", "--port", "9000"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(9000));
    }

    #[test]
    fn store_subcommands_parse() {
        let cli = Cli::try_parse_from(["mcp-remote-auth", "store", "purge-expired"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Store(StoreCommand::PurgeExpired))
        ));

        let cli = Cli::try_parse_from(["mcp-remote-auth", "store", "latest-token"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Store(StoreCommand::LatestToken))
        ));
    }

    #[test]
    fn global_config_after_subcommand() {
        let cli =
            Cli::try_parse_from(["mcp-remote-auth", "store", "stats", "-c", "proxy.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("proxy.yaml")));
    }
}
