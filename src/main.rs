use std::sync::Arc;

use anyhow::anyhow;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use slither_arena_server::config::ServerConfig;
use slither_arena_server::entropy::{provider_from_config, spawn_entropy_request};
use slither_arena_server::game::game_loop::GameLoop;
use slither_arena_server::game::state::GameState;
use slither_arena_server::metrics::{self, Metrics};
use slither_arena_server::net::game_session::{start_game_loop, GameSession};
use slither_arena_server::net::tls::TlsConfig;
use slither_arena_server::net::transport::WebTransportServer;
use slither_arena_server::settlement::{KeyedRetryQueue, LogSettlementClient, RetryPolicy, SettlementSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("slither_arena_server=info")),
        )
        .with_target(false)
        .init();

    info!("Slither Arena Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ServerConfig::from_env();
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    info!(
        "Configuration loaded: {}:{}, match={}, tick_rate={}, max_connections={}",
        config.bind_address, config.port, config.match_id, config.tick_rate, config.max_connections
    );

    // Initialize metrics
    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Settlement reporting
    let sink = settlement_sink(&config, metrics.clone())?;

    // Simulation
    let state = GameState::new(config.match_id.clone(), config.world);
    let mut game = GameLoop::new(state, sink);

    let provider = provider_from_config(&config.entropy)?;
    if provider.is_some() {
        game.await_seed();
    } else {
        warn!("No entropy source configured, running on fallback randomness");
    }

    let session = GameSession::new(game, metrics.clone(), config.max_connections);
    let commands = session.commands();

    if let Some(provider) = provider {
        spawn_entropy_request(
            provider,
            config.match_id.clone(),
            config.entropy.timeout,
            commands.clone(),
        );
    }

    let game_handle = start_game_loop(session, config.tick_interval());

    // Create WebTransport server
    let tls = TlsConfig::load(&config).await?;
    let server = WebTransportServer::new(config.clone(), tls, commands, metrics);

    info!("Server ready on https://{}", server.bind_addr());

    // Shutdown signal handler
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    };

    // Run server with graceful shutdown
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    game_handle.abort();
    info!("Server stopped");

    Ok(())
}

/// Ledger client for the configured endpoint, or the log client when none
fn settlement_sink(config: &ServerConfig, metrics: Arc<Metrics>) -> anyhow::Result<Arc<dyn SettlementSink>> {
    let policy = RetryPolicy::from_config(&config.settlement);
    let runtime = tokio::runtime::Handle::current();

    match &config.settlement.endpoint {
        #[cfg(feature = "http")]
        Some(endpoint) => {
            use slither_arena_server::settlement::HttpSettlementClient;

            info!("Settlement reports go to {}", endpoint);
            let client = HttpSettlementClient::new(endpoint.clone())?;
            Ok(Arc::new(KeyedRetryQueue::with_metrics(client, policy, runtime, metrics)))
        }
        #[cfg(not(feature = "http"))]
        Some(endpoint) => {
            warn!("SETTLEMENT_URL {} ignored: built without the `http` feature", endpoint);
            Ok(Arc::new(KeyedRetryQueue::with_metrics(LogSettlementClient, policy, runtime, metrics)))
        }
        None => Ok(Arc::new(KeyedRetryQueue::with_metrics(LogSettlementClient, policy, runtime, metrics))),
    }
}
