//! pmi-ingest: Polymarket live-data trade ingestion binary
//!
//! Subscribes to public trade activity and forwards every trade to a NATS
//! JetStream topic and/or a QuestDB table.

mod config;
mod shutdown;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pmi_connector_lib::polymarket::LiveDataClient;
use pmi_connector_lib::{
    run_server, Pipeline, ServerState, TradeProducer, TradeSink, TradeWriter, TradeWriterSink,
};

use crate::config::{Config, SinkKind};

const FEED_NAME: &str = "polymarket-live-data";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Best effort: a missing .env is normal in deployed environments
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded .env");
    }

    let config = Config::parse();
    let health_addr: SocketAddr = config.health_addr.parse()?;
    info!(
        ws_url = %config.ws_url,
        sinks = ?config.sinks,
        subscriptions = config.subscriptions().len(),
        "Starting pmi-ingest"
    );

    let sinks = build_sinks(&config).await?;

    let client = LiveDataClient::new(config.live_data_config());
    let pipeline = Pipeline::new(client, sinks);
    let handle = pipeline.handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown::shutdown_signal().await;
        shutdown_tx.send(true).ok();
    });

    let server_state = ServerState::new(FEED_NAME, handle.state_receiver(), pipeline.trades_handle());
    let server_shutdown = shutdown::wait_for(shutdown_rx.clone());
    let server = tokio::spawn(async move {
        if let Err(e) = run_server(health_addr, server_state, server_shutdown).await {
            error!(error = %e, "Health server error");
        }
    });

    let result = pipeline.run(shutdown_rx.clone()).await;
    match &result {
        Ok(()) => info!("Pipeline stopped gracefully"),
        Err(e) => error!(error = %e, "Pipeline stopped"),
    }

    if !*shutdown_rx.borrow() {
        warn!("Feed ended; health server stays up until shutdown");
        shutdown::wait_for(shutdown_rx).await;
    }
    if let Err(e) = server.await {
        error!(error = %e, "Health server task failed");
    }

    result.map_err(Into::into)
}

/// Connect every configured sink. Any failure here aborts start-up.
async fn build_sinks(config: &Config) -> Result<Vec<Arc<dyn TradeSink>>, Box<dyn std::error::Error>> {
    let mut sinks: Vec<Arc<dyn TradeSink>> = Vec::new();

    if config.has_sink(SinkKind::Broker) {
        let producer = TradeProducer::connect(
            &config.broker_urls,
            &config.broker_topic,
            &config.broker_stream,
        )
        .await?;
        info!(topic = %config.broker_topic, stream = %config.broker_stream, "Broker sink ready");
        sinks.push(Arc::new(producer));
    }

    if config.has_sink(SinkKind::Timeseries) {
        let protocol = config.questdb_transport;
        let host = config.questdb_host.clone();
        let port = config.questdb_port;
        let table = config.questdb_table.clone();
        let interval = config.flush_interval();
        let writer = tokio::task::spawn_blocking(move || {
            TradeWriter::connect(protocol, &host, port, table, interval)
        })
        .await??;
        info!(table = %writer.table(), "Time-series sink ready");
        sinks.push(Arc::new(TradeWriterSink::new(writer)));
    }

    if sinks.is_empty() {
        return Err("no sinks configured".into());
    }
    Ok(sinks)
}
