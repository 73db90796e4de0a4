use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::select;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::ConnectorError;
use crate::metrics;
use crate::polymarket::{classify, Classified, LiveDataClient, LiveDataHandle};
use crate::traits::{FrameHandler, TradeSink};

/// Trades between progress log lines
const PROGRESS_EVERY: u64 = 100;

/// Classifies frames and fans trades out to every sink.
///
/// Parse and sink failures are counted and logged; neither stops the feed.
pub struct TradeHandler {
    sinks: Vec<Arc<dyn TradeSink>>,
    trades: Arc<AtomicU64>,
}

impl TradeHandler {
    pub fn new(sinks: Vec<Arc<dyn TradeSink>>) -> Self {
        Self {
            sinks,
            trades: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle to the processed-trade counter
    pub fn trades_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.trades)
    }
}

#[async_trait]
impl FrameHandler for TradeHandler {
    async fn on_frame(&mut self, frame: Bytes) {
        let trade = match classify(&frame) {
            Ok(Classified::Trade(trade)) => trade,
            Ok(Classified::Skip) => {
                metrics::inc_frame("skip");
                return;
            }
            Err(e) => {
                metrics::inc_frame("parse_error");
                warn!(error = %e, len = frame.len(), "Dropping malformed trade frame");
                return;
            }
        };
        metrics::inc_frame("trade");

        for sink in &self.sinks {
            if let Err(e) = sink.accept(&trade).await {
                metrics::inc_sink_error(sink.name());
                warn!(
                    sink = sink.name(),
                    tx = %trade.transaction_hash,
                    error = %e,
                    "Sink rejected trade"
                );
            }
        }

        let processed = self.trades.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % PROGRESS_EVERY == 0 {
            info!(trades = processed, "Trades processed");
        }
    }
}

/// Live-data client wired to its sinks, with shutdown sequencing
pub struct Pipeline {
    client: LiveDataClient,
    handler: TradeHandler,
    sinks: Vec<Arc<dyn TradeSink>>,
}

impl Pipeline {
    pub fn new(client: LiveDataClient, sinks: Vec<Arc<dyn TradeSink>>) -> Self {
        Self {
            client,
            handler: TradeHandler::new(sinks.clone()),
            sinks,
        }
    }

    /// Handle to the underlying connection (state, subscriptions, close)
    pub fn handle(&self) -> LiveDataHandle {
        self.client.handle()
    }

    pub fn trades_handle(&self) -> Arc<AtomicU64> {
        self.handler.trades_handle()
    }

    /// Run until the feed ends or `shutdown` turns true, then close the
    /// connection and every sink in order.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConnectorError> {
        let Pipeline {
            client,
            handler,
            sinks,
        } = self;
        let handle = client.handle();
        let trades = handler.trades_handle();
        let mut feed = tokio::spawn(client.run(handler));

        let result = loop {
            select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        handle.close();
                        break join_feed((&mut feed).await);
                    }
                }
                joined = &mut feed => break join_feed(joined),
            }
        };

        for sink in &sinks {
            match sink.close().await {
                Ok(()) => info!(sink = sink.name(), "Sink closed"),
                Err(e) => error!(sink = sink.name(), error = %e, "Sink close failed"),
            }
        }

        info!(trades = trades.load(Ordering::Relaxed), "Pipeline stopped");
        result
    }
}

fn join_feed(
    joined: Result<Result<(), ConnectorError>, tokio::task::JoinError>,
) -> Result<(), ConnectorError> {
    joined.unwrap_or_else(|e| Err(ConnectorError::ReadFailed(format!("feed task: {}", e))))
}
