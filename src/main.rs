use claude_bridge::config::config_search_paths;
use claude_bridge::{build_router, AppState, BridgeConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-bridge",
    about = "Serve the Anthropic Messages API on top of any OpenAI-compatible provider",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Default provider (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(provider) = cli.provider {
        config.default_provider = provider;
    }
    config.validate()?;

    // Fail fast on a default provider that cannot be reached at all.
    let (default_name, default_provider) = config.provider(None)?;
    let base_url = default_provider.effective_base_url(default_name)?;

    let mut providers: Vec<&String> = config.providers.keys().collect();
    providers.sort();

    info!("claude-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Default provider: {} ({})", default_name, base_url);
    info!(
        "  Providers:        {}",
        providers
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if let Some(max_tokens) = config.server.max_tokens {
        info!("  max_tokens:       {} (forced)", max_tokens);
    }

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState { config, client });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://{} claude", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
