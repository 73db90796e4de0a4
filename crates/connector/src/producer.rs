//! Trade producer: publishes each trade to a broker topic
//!
//! `produce` hands the record to the transport and returns; broker
//! acknowledgements are awaited by a background tracker task, which logs and
//! counts failures without reporting them to the caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pmi_middleware::{DeliveryFuture, NatsTransport, OutboundRecord, TopicSubjects, Transport};

use crate::error::{ProducerError, SinkError};
use crate::metrics;
use crate::polymarket::ActivityTrade;
use crate::traits::TradeSink;

/// Flat wire shape of a trade on the broker topic
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeMessage<'a> {
    pub side: &'a str,
    pub outcome: &'a str,
    pub event_slug: &'a str,
    pub slug: &'a str,
    pub condition_id: &'a str,
    pub transaction_hash: &'a str,
    pub proxy_wallet: &'a str,
    pub question_id: &'a str,
    pub price: f64,
    pub size: f64,
    pub fee: f64,
    pub timestamp: i64,
}

impl<'a> From<&'a ActivityTrade> for TradeMessage<'a> {
    fn from(trade: &'a ActivityTrade) -> Self {
        Self {
            side: trade.side.as_str(),
            outcome: &trade.outcome,
            event_slug: &trade.event_slug,
            slug: &trade.market_slug,
            condition_id: &trade.condition_id,
            transaction_hash: &trade.transaction_hash,
            proxy_wallet: &trade.proxy_wallet,
            question_id: &trade.question_id,
            price: trade.price,
            size: trade.size,
            fee: trade.fee,
            timestamp: trade.timestamp,
        }
    }
}

/// Partition key for a trade: the transaction hash, or none when it is empty
pub fn partition_key(trade: &ActivityTrade) -> Option<Bytes> {
    if trade.transaction_hash.is_empty() {
        None
    } else {
        Some(Bytes::copy_from_slice(trade.transaction_hash.as_bytes()))
    }
}

#[derive(Default)]
struct DeliveryCounters {
    acked: AtomicU64,
    failed: AtomicU64,
}

pub struct TradeProducer {
    transport: Arc<dyn Transport>,
    topic: String,
    deliveries: Mutex<Option<mpsc::UnboundedSender<DeliveryFuture>>>,
    tracker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<DeliveryCounters>,
    closed: AtomicBool,
}

impl TradeProducer {
    /// Wrap an existing transport. Must be called inside a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, topic: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(DeliveryCounters::default());
        let tracker = tokio::spawn(track_deliveries(rx, Arc::clone(&counters)));
        Self {
            transport,
            topic: topic.into(),
            deliveries: Mutex::new(Some(tx)),
            tracker: Mutex::new(Some(tracker)),
            counters,
            closed: AtomicBool::new(false),
        }
    }

    /// Connect to NATS and make sure the JetStream stream for `topic` exists
    pub async fn connect(
        servers: &str,
        topic: &str,
        stream: &str,
    ) -> Result<Self, ProducerError> {
        let transport = NatsTransport::connect(servers).await?;
        transport.ensure_stream(&topic_subjects(topic, stream)).await?;
        Ok(Self::new(Arc::new(transport), topic))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Queue one trade. Returns once the transport has accepted the record;
    /// the broker acknowledgement is tracked in the background.
    pub async fn produce(&self, trade: &ActivityTrade) -> Result<(), ProducerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProducerError::Closed);
        }

        let payload = serde_json::to_vec(&TradeMessage::from(trade))?;
        let mut record = OutboundRecord::new(self.topic.as_str(), payload);
        if let Some(key) = partition_key(trade) {
            record = record.with_key(key);
        }

        let delivery = self.transport.publish(record).await?;

        let queued = self
            .deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|tx| tx.send(delivery).is_ok())
            .unwrap_or(false);
        if !queued {
            return Err(ProducerError::Closed);
        }
        Ok(())
    }

    /// Flush the transport, then wait for every outstanding acknowledgement.
    /// Later calls are no-ops.
    pub async fn close(&self) -> Result<(), ProducerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Producer already closed");
            return Ok(());
        }

        let flushed = self.transport.flush().await;
        if let Err(e) = &flushed {
            warn!(error = %e, topic = %self.topic, "Producer flush failed");
        }

        // Dropping the sender lets the tracker drain and exit
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let tracker = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tracker) = tracker {
            if let Err(e) = tracker.await {
                warn!(error = %e, "Delivery tracker task failed");
            }
        }

        info!(
            topic = %self.topic,
            acked = self.acked(),
            failed = self.failed(),
            "Producer closed"
        );
        flushed.map_err(ProducerError::from)
    }

    /// Records acknowledged by the broker so far
    pub fn acked(&self) -> u64 {
        self.counters.acked.load(Ordering::SeqCst)
    }

    /// Records the broker reported as failed so far
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::SeqCst)
    }
}

async fn track_deliveries(
    mut rx: mpsc::UnboundedReceiver<DeliveryFuture>,
    counters: Arc<DeliveryCounters>,
) {
    let mut pending = FuturesUnordered::new();
    let record = |result: Result<(), pmi_middleware::TransportError>| match result {
        Ok(()) => {
            counters.acked.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::SeqCst);
            metrics::inc_delivery_failure();
            warn!(error = %e, "Trade delivery failed");
        }
    };

    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(delivery) => pending.push(delivery),
                None => break,
            },
            Some(result) = pending.next(), if !pending.is_empty() => record(result),
        }
    }

    while let Some(result) = pending.next().await {
        record(result);
    }
}

#[async_trait]
impl TradeSink for TradeProducer {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn accept(&self, trade: &ActivityTrade) -> Result<(), SinkError> {
        self.produce(trade).await.map_err(SinkError::from)
    }

    async fn close(&self) -> Result<(), SinkError> {
        TradeProducer::close(self).await.map_err(SinkError::from)
    }
}

/// Stream layout for a topic: bare subject plus every keyed subject under it
fn topic_subjects(topic: &str, stream: &str) -> TopicSubjects {
    TopicSubjects::with_stream(topic, stream)
}
