//! taa-admin - 缓存检查工具

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use taa_bootstrap::{connect_redis, connect_store};
use taa_common::Identity;
use taa_config::{AppConfig, StoreLocation};
use taa_ports::CacheStore;
use target_access::admin::CacheStats;
use target_access::api::QUERY_KEY_HEADER;

/// Inspect and manage the target access cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory containing default.toml
    #[arg(long, env = "TAA_CONFIG_DIR", default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the cached target access strings for a user
    Tas { username: String },
    /// Remove the cached entry for a user
    Clear { username: String },
    /// Print cache backend, ping and query statistics
    Stats,
    /// Query the running service for a user
    Get {
        username: String,
        /// Base URL of the service
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(&cli.config_dir)?;

    match cli.command {
        Command::Tas { username } => {
            let identity = parse_username(&username)?;
            let store = connect_store(&config.store).await?;
            let tas = store
                .get(identity.value_key())
                .await
                .and_then(|value| value.into_token_set())
                .unwrap_or_default();
            let collected = store
                .get(&identity.timestamp_key())
                .await
                .and_then(|value| value.as_instant())
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "Nothing collected".to_string());

            println!("  Username: '{}' ({})", identity, identity.value_key());
            println!(" Collected: {}", collected);
            println!("No. of TAS: {}", tas.len());
            if !tas.is_empty() {
                println!("   TAS Set:");
                println!("{}", tas.to_vec().join(", "));
            }
        }
        Command::Clear { username } => {
            let identity = parse_username(&username)?;
            let store = connect_store(&config.store).await?;
            if store.delete(identity.value_key()).await {
                println!("Cleared '{}'", identity);
            } else {
                println!("Nothing cached for '{}'", identity);
            }
        }
        Command::Stats => {
            let StoreLocation::Redis(url) = config.store.location() else {
                return Err("stats requires a shared Redis store".into());
            };
            let store = connect_redis(&config.store, &url).await?;
            if let Some(info) = store.server_info().await {
                let mut lines: Vec<&str> = info
                    .lines()
                    .filter(|line| line.contains(':') && !line.starts_with('#'))
                    .collect();
                lines.sort_unstable();
                for line in lines {
                    println!("{}", line.replacen(':', "=", 1));
                }
            }
            println!("---");
            println!("{}", CacheStats::collect(&store).await);
        }
        Command::Get { username, url } => {
            let identity = parse_username(&username)?;
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(4))
                .build()?;
            let mut request = client.get(format!(
                "{}/target-access/{}",
                url.trim_end_matches('/'),
                identity.value_key()
            ));
            if let Some(key) = &config.query_key {
                request = request.header(QUERY_KEY_HEADER, key.expose_secret().as_str());
            }
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(format!("Failed get request ({}) '{}'", status, body).into());
            }
            println!("{}", body);
        }
    }
    Ok(())
}

fn parse_username(username: &str) -> Result<Identity, String> {
    Identity::parse(username).map_err(|e| format!("\"{}\" is not a valid username: {}", username, e))
}
