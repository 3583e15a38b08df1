use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use monitoring_service::chain::{AlloyProvider, ChainProvider, ChainReader, ChainWriter};
use monitoring_service::config::{Cli, Command, RunConfig};
use monitoring_service::db::Store;
use monitoring_service::engine::ReducerConfig;
use monitoring_service::metrics;
use monitoring_service::service::Service;
use monitoring_service::signatures::EcdsaVerifier;
use monitoring_service::transport::ChannelTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let Command::Run(args) = cli.command;
    let config = args.into_config().map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!("starting monitoring service v{}", env!("CARGO_PKG_VERSION"));

    let prometheus_handle = metrics::install();

    let store = Store::connect(&config.database_url).await?;

    let provider = AlloyProvider::connect(&config.rpc_url, config.private_key.expose()).await?;
    let chain_id = provider.chain_id().await?;
    if chain_id != config.chain_id {
        anyhow::bail!("node reports chain id {chain_id}, expected {}", config.chain_id);
    }

    store
        .ensure_blockchain_state(
            config.chain_id,
            config.registry_address,
            config.monitoring_service_address,
            config.monitoring_service_address,
            config.sync_start_block,
        )
        .await?;

    let provider: Arc<dyn ChainProvider> = Arc::new(provider);
    let reader = ChainReader::new(provider.clone(), config.required_confirmations);
    let writer = ChainWriter::new(provider, config.monitoring_service_address);

    let reducer_config = ReducerConfig { monitor_fraction: config.monitor_fraction, claim_delay_blocks: config.claim_delay_blocks };

    let service = Service::new(
        store,
        reader,
        writer,
        Box::new(EcdsaVerifier),
        reducer_config,
        Duration::from_secs(config.poll_interval_secs),
        config.monitoring_service_address,
        config.chain_id,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(metrics_addr) = config.metrics_addr {
        tokio::spawn(serve_operational_http(metrics_addr, prometheus_handle));
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c; requesting shutdown");
            let _ = shutdown_tx.send(true);
        }
    });

    // No concrete off-chain transport is implemented (out of scope); the
    // channel's sender is dropped immediately so `recv` resolves to `None`
    // and the service runs purely off chain-observed events until a real
    // Request Collector is wired in.
    let (_sender, transport) = ChannelTransport::new();

    service.run(Box::new(transport), shutdown_rx).await?;

    tracing::info!("shutdown complete");
    Ok(())
}

#[derive(Clone)]
struct OperationalState {
    prometheus_handle: PrometheusHandle,
}

async fn serve_operational_http(addr: std::net::SocketAddr, prometheus_handle: PrometheusHandle) {
    let state = OperationalState { prometheus_handle };
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            tracing::info!(%addr, "operational HTTP surface listening");
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!(error = %err, "operational HTTP server exited");
            }
        }
        Err(err) => tracing::error!(error = %err, %addr, "failed to bind operational HTTP surface"),
    }
}

async fn health_check() -> impl IntoResponse {
    "ok"
}

async fn metrics_handler(State(state): State<OperationalState>) -> impl IntoResponse {
    state.prometheus_handle.render()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
