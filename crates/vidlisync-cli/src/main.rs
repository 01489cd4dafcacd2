use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use vidlisync_core::config::Config;
use vidlisync_gateway::GatewayState;
use vidlisync_media::factory::build_engines;
use vidlisync_pipeline::TranslationPipeline;

mod logging;

#[derive(Parser)]
#[command(
    name = "vidlisync",
    about = "Real-time speech-to-speech translation gateway",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Gateway {
        /// Port to listen on (default: 8765)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Query a running gateway's health
    Health {
        /// Gateway port (default: from config)
        #[arg(long)]
        port: Option<u16>,

        /// Gateway host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for errors
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let config = Config::load(&config_path)?;

    // Initialize logging
    logging::init(&config.logging.clone().unwrap_or_default(), cli.verbose)?;

    match cli.command {
        Commands::Gateway { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            run_gateway(config, port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
        Commands::Health { port, host } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let resp = reqwest::get(format!("http://{host}:{port}/health")).await?;
            let status = resp.status();
            let body: serde_json::Value = resp.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            if !status.is_success() {
                anyhow::bail!("Gateway reported {status}");
            }
        }
    }

    Ok(())
}

async fn run_gateway(config: Config, port: u16) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for w in &warnings {
        tracing::warn!("{w}");
    }
    if !errors.is_empty() {
        anyhow::bail!("Invalid configuration: {}", errors.join("; "));
    }

    let engines = build_engines(config.engines.as_ref());
    let pipeline = Arc::new(TranslationPipeline::new(engines, config.pipeline()));
    pipeline.initialize().await?;
    tracing::info!("Translation pipeline ready");

    #[allow(unused_mut)]
    let mut state = GatewayState::new(Arc::new(config), pipeline);

    #[cfg(feature = "metrics")]
    {
        state.prometheus = Some(vidlisync_gateway::metrics::install_prometheus_recorder()?);
        tracing::info!("Prometheus metrics at /metrics/prometheus");
    }

    tracing::info!("Starting VidLiSync gateway on port {port}");
    vidlisync_gateway::start_gateway(Arc::new(state), port).await
}
