use anyhow::{Context, Result};
use streamgate::{
    config::GatewayConfig,
    credentials::AuthContext,
    extractor,
    routes::{self, AppState, INNERTUBE_BASE},
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "streamgate=info,tower_http=info".to_string()),
        )
        .init();

    run().await
}

async fn run() -> Result<()> {
    let config = GatewayConfig::from_env().context("invalid configuration")?;

    let auth = AuthContext::load(&config.credentials);
    if auth.is_none() {
        warn!("No credentials loaded; authenticated strategies are disabled.");
    }

    let extractor_enabled = match config.extractor.enabled {
        Some(enabled) => enabled,
        None => extractor::probe(&config.extractor.binary, config.extractor.timeout).await,
    };
    if extractor_enabled {
        info!(
            "Extractor strategy enabled: {} ({:?} mode)",
            config.extractor.binary.display(),
            config.extractor.mode
        );
    } else {
        info!("Extractor strategy disabled.");
    }

    let http = routes::http_client(&config).context("failed to build HTTP client")?;
    let state = AppState::new(&config, http, INNERTUBE_BASE, auth, extractor_enabled)
        .context("failed to build image client")?;
    let app = routes::router(state, routes::build_cors_layer(&config.allowed_origins));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!("Streamgate listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .context("HTTP server error")
}
