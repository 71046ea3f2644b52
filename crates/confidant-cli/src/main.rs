use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use confidant_agents::Orchestrator;
use confidant_config::{AppConfig, ConfigLoader, LoggingConfig, ProviderConfig};
use confidant_gateway::GatewayServer;
use confidant_security::{CredentialPools, RedactingWriter};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Personal conversational assistant backend with long-term memory
#[derive(Parser)]
#[command(name = "confidant", version, about)]
struct Cli {
    /// Config file (YAML or TOML). Defaults to ./confidant.yml, ./confidant.toml
    /// or ~/.confidant/config.yml, whichever exists first.
    #[arg(long, short, global = true, env = "CONFIDANT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override gateway.host
        #[arg(long)]
        host: Option<String>,

        /// Override gateway.port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate the config and print the provider chains and pool sizes
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ConfigLoader::load(cli.config.as_deref()).context("failed to load config")?;
    init_tracing(&config.logging)?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            serve(config).await
        }
        Commands::CheckConfig => {
            check_config(&config);
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::try_new(directive),
        _ => EnvFilter::try_new(logging.filter.as_deref().unwrap_or("info")),
    }
    .context("invalid log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr());
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    let pools = Arc::new(CredentialPools::from_config(&config.credentials));
    let orchestrator =
        Orchestrator::from_config(&config, pools).context("failed to start orchestrator")?;
    info!(
        "starting {} on {}:{}",
        config.assistant.name, config.gateway.host, config.gateway.port
    );

    GatewayServer::new(config, Arc::new(orchestrator))
        .run()
        .await
        .context("gateway stopped with an error")
}

fn check_config(config: &AppConfig) {
    println!("config ok");
    println!("assistant: {}", config.assistant.name);
    println!("database:  {}", config.database.resolved_path().display());
    println!(
        "gateway:   {}:{}",
        config.gateway.host, config.gateway.port
    );

    let providers = &config.providers;
    for (capability, chain) in [
        ("text", &providers.text),
        ("vision", &providers.vision),
        ("embedding", &providers.embedding),
        ("image", &providers.image),
        ("speech", &providers.speech),
        ("enrichment", &providers.enrichment),
    ] {
        println!("{capability:<11}{}", describe_chain(chain));
    }

    let pools = CredentialPools::from_config(&config.credentials);
    for name in pools.pool_names() {
        println!("pool {name}: {} key(s)", pools.pool_size(&name));
    }
}

fn describe_chain(chain: &[ProviderConfig]) -> String {
    if chain.is_empty() {
        return "(none)".to_string();
    }
    chain
        .iter()
        .map(|p| match &p.pool {
            Some(pool) => format!("{} [{pool}]", p.id),
            None => p.id.clone(),
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}
