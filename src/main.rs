//! Gmail MCP Server
//!
//! Serves Gmail tools over MCP, authenticates accounts, and archives GitHub
//! notification threads whose issue has been closed.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use gmail_mcp::cleanup::{Cleanup, CleanupOptions, DEFAULT_MAX_THREADS};
use gmail_mcp::config::Config;
use gmail_mcp::error::Result;
use gmail_mcp::github::GithubClient;
use gmail_mcp::gmail::accounts::GmailAccounts;
use gmail_mcp::gmail::auth::Authenticator;
use gmail_mcp::mcp::server::McpServer;
use gmail_mcp::mcp::tools::{register_gmail_tools, ToolRegistry};
use gmail_mcp::telemetry::{init_logging, Telemetry, DEFAULT_ACCOUNT};

/// Gmail MCP Server
#[derive(Parser)]
#[command(name = "gmail-mcp-server")]
#[command(author, version, about = "Gmail MCP Server - A Model Context Protocol server for Gmail")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdio (default)
    Serve,

    /// Authenticate a Gmail account
    Auth {
        /// Account name; an email address is used as the login hint
        #[arg(long, default_value = DEFAULT_ACCOUNT)]
        account: String,
    },

    /// Archive GitHub notifications whose issue or pull request is closed
    Cleanup {
        #[arg(long, default_value = DEFAULT_ACCOUNT)]
        account: String,

        /// Report what would be archived without changing anything
        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value_t = DEFAULT_MAX_THREADS)]
        max_threads: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::new()?;

    if let Err(e) = init_logging(&config.telemetry) {
        eprintln!("Logging disabled: {}", e);
    }
    let telemetry = Telemetry::from_config(&config.telemetry);

    if config.find_and_copy_oauth_keys()? {
        info!(path = %config.oauth_path.display(), "Copied OAuth keys from current directory");
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config, telemetry).await?,
        Commands::Auth { account } => {
            let authenticator = Authenticator::new(config, &account, telemetry.metrics()).await?;
            authenticator.authenticate_interactive().await?;
            eprintln!("Authentication completed successfully for '{}'", account);
        }
        Commands::Cleanup {
            account,
            dry_run,
            max_threads,
        } => {
            let github = GithubClient::new(
                config.github_token.clone(),
                telemetry.tracing().clone(),
                telemetry.metrics(),
            );
            let accounts = GmailAccounts::new(config, telemetry.metrics());
            let cleanup = Cleanup::new(accounts.client(&account).await?, github);
            let report = cleanup.run(CleanupOptions { dry_run, max_threads }).await?;

            let verb = if dry_run { "Would archive" } else { "Archived" };
            eprintln!(
                "Scanned {} threads. {} {}, skipped {}, failed {}.",
                report.scanned,
                verb,
                report.archived,
                report.skipped,
                report.failures.len()
            );
            for (thread_id, error) in &report.failures {
                eprintln!("  {}: {}", thread_id, error);
            }
        }
    }

    Ok(())
}

async fn run_server(config: Config, telemetry: Telemetry) -> Result<()> {
    if !config.oauth_keys_exist() {
        eprintln!("Error: OAuth keys file not found.");
        eprintln!(
            "Please place gcp-oauth.keys.json in current directory or {}",
            config.config_dir.display()
        );
        std::process::exit(1);
    }

    let read_only = config.read_only;
    let metrics = telemetry.metrics();
    let accounts = Arc::new(GmailAccounts::new(config, Arc::clone(&metrics)));

    let mut registry = ToolRegistry::new(telemetry, read_only);
    register_gmail_tools(&mut registry, accounts);
    info!(tools = registry.len(), read_only, "Starting MCP server");

    let mut server = McpServer::new(registry, metrics);
    server.run_stdio().await
}
