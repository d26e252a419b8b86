use anyhow::Context;
use clap::{Parser, Subcommand};
use recx_api::upstream::{parse_orders, parse_reviews};
use recx_api::{AppState, RestApi, UpstreamClient, UpstreamConfig};
use recx_core::{EngineConfig, InteractionBatch, ModelKind};
use recx_storage::ModelManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Rating fusion and recommendation engine
#[derive(Parser, Debug)]
#[command(name = "recx")]
#[command(about = "Rating fusion and recommendation engine", long_about = None)]
struct Args {
    /// Path to the data directory
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Model to build and serve (similarity or latent)
    #[arg(long)]
    model: Option<ModelKind>,

    /// JSON file overriding the engine configuration
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve recommendations over HTTP
    Serve {
        /// HTTP API port
        #[arg(long, default_value_t = 8000)]
        http_port: u16,

        /// Orders endpoint of the upstream order service
        #[arg(long)]
        orders_url: Option<String>,

        /// Reviews endpoint of the upstream product service
        #[arg(long)]
        reviews_url: Option<String>,

        /// Endpoint listing the currently active item ids
        #[arg(long)]
        active_items_url: Option<String>,
    },
    /// Run one rebuild from JSON files and print the report
    Rebuild {
        /// Orders in the upstream wire format
        #[arg(long)]
        orders: PathBuf,

        /// Reviews in the upstream wire format
        #[arg(long)]
        reviews: PathBuf,
    },
}

fn load_config(path: Option<&Path>, model: Option<ModelKind>) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            EngineConfig::from_json(&raw)?
        }
        None => EngineConfig::default(),
    };
    if let Some(model) = model {
        config.model = model;
    }
    config.validate()?;
    Ok(config)
}

fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(args.config.as_deref(), args.model)?;
    info!("Starting recx v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {:?}", args.data_dir);
    info!("Model: {}", config.model);

    let manager = Arc::new(ModelManager::with_lmdb(&args.data_dir, config)?);

    match args.command {
        Command::Rebuild { orders, reviews } => {
            let batch = InteractionBatch::new(
                parse_orders(read_json(&orders)?)?,
                parse_reviews(read_json(&reviews)?)?,
            );
            let report = tokio::task::spawn_blocking(move || manager.rebuild(&batch)).await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve {
            http_port,
            orders_url,
            reviews_url,
            active_items_url,
        } => {
            let defaults = UpstreamConfig::default();
            let upstream = UpstreamClient::new(UpstreamConfig {
                orders_url: orders_url.unwrap_or(defaults.orders_url),
                reviews_url: reviews_url.unwrap_or(defaults.reviews_url),
                active_items_url,
                timeout_secs: defaults.timeout_secs,
            })?;
            info!("Model loaded: {}", manager.is_ready());

            let state = AppState { manager, upstream };
            let http_handle = std::thread::spawn(move || {
                info!("Starting HTTP server on port {}", http_port);
                let sys = actix_web::rt::System::new();
                sys.block_on(async {
                    if let Err(e) = RestApi::start(state, http_port).await {
                        tracing::error!("HTTP server error: {}", e);
                    }
                })
            });

            info!("HTTP API: http://localhost:{}/", http_port);

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                }
                _ = tokio::task::spawn_blocking(move || {
                    http_handle.join().ok();
                }) => {
                    info!("HTTP server stopped");
                }
            }

            info!("Shutting down...");
        }
    }

    Ok(())
}
