use std::sync::Arc;

use tokio::{net::TcpListener, time::Duration};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vidgrab::{
    AppState,
    access::AccessService,
    config::{Config, build_cors_layer},
    provider::{CobaltProvider, FallbackChain},
    router,
    store::JsonStore,
};

const STORE_FILE: &str = "access.json";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "vidgrab=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = Config::from_env();

    let store = JsonStore::open(config.data_dir.join(STORE_FILE))
        .await
        .map_err(|error| format!("Could not open the record store: {error}"))?;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.provider_timeout_seconds))
        .build()
        .map_err(|error| format!("Could not build HTTP client: {error}"))?;

    info!(
        "Using {} provider instance(s) with a {}s timeout each.",
        config.provider_instances.len(),
        config.provider_timeout_seconds
    );
    if config.webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET is not set. The donation webhook will refuse every request.");
    }

    let state = AppState {
        chain: FallbackChain::new(
            config.provider_instances.clone(),
            Arc::new(CobaltProvider::new(http_client)),
        ),
        access: AccessService::new(
            Arc::new(store),
            config
                .access_token_ttl_days
                .and_then(chrono::Duration::try_days),
        ),
        webhook_secret: config.webhook_secret.as_deref().map(Arc::from),
    };

    let cors = build_cors_layer(&config.allowed_origins)?;
    let app = router(state).layer(cors).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| format!("Could not bind {}: {error}", config.bind_addr))?;

    info!("Backend ready on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|error| format!("HTTP server error: {error}"))
}
