use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use user_directory::comms::user_api;
use user_directory::config::ServiceConfig;
use user_directory::security::bootstrap::{RetryPolicy, SecretBootstrapper};
use user_directory::security::vault_client::VaultClient;
use user_directory::utils;

#[derive(Parser)]
#[command(name = "user-directory", version, about = "User directory service")]
struct AppCli {
    /// Config file path (JSON); built-in defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Refuse to start when VAULT_ADDR / VAULT_TOKEN are not set
    #[arg(long, global = true)]
    strict_secrets: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch secrets, then serve the HTTP API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Fetch secrets from Vault, report what was found, and exit
    CheckSecrets,
}

async fn check_secrets(config: &ServiceConfig) -> Result<()> {
    let vault = VaultClient::from_env(&config.vault)?;
    let bootstrapper = SecretBootstrapper::new(
        Arc::new(vault),
        RetryPolicy::from(&config.vault),
        config.secret_keys.clone(),
    );
    let secrets = bootstrapper.fetch_secrets().await?;

    let backend = secrets
        .connection_string
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .unwrap_or("<none>");
    let report = serde_json::json!({
        "issuer": secrets.bundle.issuer(),
        "audience": secrets.bundle.audience(),
        "signing_key_bytes": secrets.bundle.signing_key().len(),
        "directory_backend": backend,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    let mut config = ServiceConfig::load(args.config.as_deref())?;
    config.apply_strict_secrets(args.strict_secrets);

    match args.command.unwrap_or(Commands::Serve { port: 8080 }) {
        Commands::Serve { port } => {
            info!(version = user_directory::VERSION, "Starting user directory on port {port}");
            user_api::serve(config, port).await?;
        }
        Commands::CheckSecrets => check_secrets(&config).await?,
    }

    Ok(())
}
