//! Batched trade writer for the time-series store
//!
//! Rows accumulate in the `LineSender` buffer and are flushed on a bounded
//! interval. Two flush modes share one contract:
//!
//! - `BackgroundTimer`: a dedicated std::thread flushes every interval
//! - `Auto`: no thread; `write` flushes in-line once the interval has elapsed
//!
//! Every write, flush and close takes the same session lock, so the timer
//! never interleaves with a caller.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use pmi_middleware::{IlpProtocol, LineSender, QuestDbSender, Row};

use crate::error::{SinkError, WriterError};
use crate::metrics;
use crate::polymarket::ActivityTrade;
use crate::traits::TradeSink;

pub const DEFAULT_TABLE: &str = "polymarket_trades";
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_PENDING_ROWS: usize = 100_000;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// How buffered rows reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    BackgroundTimer(Duration),
    Auto(Duration),
}

impl FlushMode {
    /// TCP has no transport-level flushing, so it needs the timer thread
    pub fn for_protocol(protocol: IlpProtocol, interval: Duration) -> Self {
        match protocol {
            IlpProtocol::Tcp => FlushMode::BackgroundTimer(interval),
            IlpProtocol::Http => FlushMode::Auto(interval),
        }
    }

    /// A zero timer interval becomes the default; `Auto(ZERO)` flushes every write
    fn normalized(self) -> Self {
        match self {
            FlushMode::BackgroundTimer(interval) if interval.is_zero() => {
                FlushMode::BackgroundTimer(DEFAULT_FLUSH_INTERVAL)
            }
            other => other,
        }
    }

    fn interval(self) -> Duration {
        match self {
            FlushMode::BackgroundTimer(interval) | FlushMode::Auto(interval) => interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeWriterConfig {
    pub table: String,
    pub flush_mode: FlushMode,
    /// Rows kept across failed flushes before the buffer is discarded
    pub max_pending_rows: usize,
}

impl Default for TradeWriterConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            flush_mode: FlushMode::BackgroundTimer(DEFAULT_FLUSH_INTERVAL),
            max_pending_rows: DEFAULT_MAX_PENDING_ROWS,
        }
    }
}

/// Map a trade onto a row of the trades table
pub fn trade_row(table: &str, trade: &ActivityTrade) -> Row {
    Row::new(table, trade.timestamp.saturating_mul(NANOS_PER_SEC))
        .symbol("side", trade.side.as_str())
        .symbol("outcome", trade.outcome.as_str())
        .symbol("event_slug", trade.event_slug.as_str())
        .str_column("asset", trade.asset.as_str())
        .str_column("transaction_hash", trade.transaction_hash.as_str())
        .str_column("condition_id", trade.condition_id.as_str())
        .str_column("question_id", trade.question_id.as_str())
        .str_column("market_slug", trade.market_slug.as_str())
        .str_column("title", trade.title.as_str())
        .str_column("event_title", trade.event_title.as_str())
        .str_column("proxy_wallet", trade.proxy_wallet.as_str())
        .str_column("name", trade.name.as_str())
        .str_column("pseudonym", trade.pseudonym.as_str())
        .f64_column("price", trade.price)
        .f64_column("size", trade.size)
        .f64_column("fee", trade.fee)
        .i64_column("outcome_index", trade.outcome_index)
}

struct Session {
    sender: Box<dyn LineSender>,
    last_flush: Instant,
    closed: bool,
}

struct Inner {
    table: String,
    session: Mutex<Session>,
    max_pending_rows: usize,
    /// Set in `Auto` mode
    auto_flush: Option<Duration>,
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_locked(&self, session: &mut Session) -> Result<(), WriterError> {
        if session.closed {
            return Err(WriterError::Closed);
        }
        session.last_flush = Instant::now();

        let pending = session.sender.pending_rows();
        match session.sender.flush() {
            Ok(()) => {
                if pending > 0 {
                    debug!(rows = pending, table = %self.table, "Flushed trades");
                }
                Ok(())
            }
            Err(e) => {
                metrics::inc_flush_failure();
                let still_pending = session.sender.pending_rows();
                if still_pending > self.max_pending_rows {
                    let dropped = session.sender.discard();
                    metrics::add_rows_dropped(dropped);
                    error!(
                        dropped = dropped,
                        max_pending_rows = self.max_pending_rows,
                        table = %self.table,
                        "Flush failing, discarded buffered trades"
                    );
                }
                Err(WriterError::FlushFailed(e))
            }
        }
    }

    fn append_locked(&self, session: &mut Session, trade: &ActivityTrade) -> Result<(), WriterError> {
        if session.closed {
            return Err(WriterError::Closed);
        }
        session.sender.append(&trade_row(&self.table, trade))?;
        Ok(())
    }

    fn auto_flush_due(&self, session: &Session) -> bool {
        self.auto_flush
            .is_some_and(|interval| session.last_flush.elapsed() >= interval)
    }
}

/// Background flush thread
struct Flusher {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl Flusher {
    fn spawn(inner: Arc<Inner>, interval: Duration) -> std::io::Result<Self> {
        let (stop, stop_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("trade-flusher".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let mut session = inner.session();
                        if session.closed {
                            break;
                        }
                        if let Err(e) = inner.flush_locked(&mut session) {
                            warn!(error = %e, "Timed trade flush failed");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self { stop, thread })
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            error!("Trade flusher thread panicked");
        }
    }
}

/// Buffered writer of trades into one time-series table
pub struct TradeWriter {
    inner: Arc<Inner>,
    flusher: Mutex<Option<Flusher>>,
}

impl TradeWriter {
    pub fn new(sender: Box<dyn LineSender>, config: TradeWriterConfig) -> Result<Self, WriterError> {
        let flush_mode = config.flush_mode.normalized();
        if flush_mode != config.flush_mode {
            warn!(
                default_ms = DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
                "Zero flush interval, using default"
            );
        }
        let auto_flush = match flush_mode {
            FlushMode::Auto(interval) => Some(interval),
            FlushMode::BackgroundTimer(_) => None,
        };
        let inner = Arc::new(Inner {
            table: config.table,
            session: Mutex::new(Session {
                sender,
                last_flush: Instant::now(),
                closed: false,
            }),
            max_pending_rows: config.max_pending_rows,
            auto_flush,
        });

        let flusher = match flush_mode {
            FlushMode::BackgroundTimer(interval) => Some(
                Flusher::spawn(Arc::clone(&inner), interval).map_err(|e| {
                    WriterError::TimeSeries(pmi_middleware::TimeSeriesError::ConnectionFailed(
                        format!("spawn flusher thread: {}", e),
                    ))
                })?,
            ),
            FlushMode::Auto(_) => None,
        };

        info!(
            table = %inner.table,
            mode = ?flush_mode,
            interval_ms = flush_mode.interval().as_millis() as u64,
            "Trade writer ready"
        );
        Ok(Self {
            inner,
            flusher: Mutex::new(flusher),
        })
    }

    /// Connect to QuestDB over ILP. Blocks while the connection is made.
    pub fn connect(
        protocol: IlpProtocol,
        host: &str,
        port: u16,
        table: impl Into<String>,
        flush_interval: Duration,
    ) -> Result<Self, WriterError> {
        let sender = QuestDbSender::connect(protocol, host, port)?;
        Self::new(
            Box::new(sender),
            TradeWriterConfig {
                table: table.into(),
                flush_mode: FlushMode::for_protocol(protocol, flush_interval),
                ..Default::default()
            },
        )
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    /// Buffer one trade. Success does not mean the row is durable.
    pub fn write(&self, trade: &ActivityTrade) -> Result<(), WriterError> {
        let mut session = self.inner.session();
        self.inner.append_locked(&mut session, trade)?;
        if self.inner.auto_flush_due(&session) {
            if let Err(e) = self.inner.flush_locked(&mut session) {
                warn!(error = %e, "Interval trade flush failed");
            }
        }
        Ok(())
    }

    /// Buffer every trade in order, then flush once.
    ///
    /// Stops at the first rejected trade and reports its index; nothing after
    /// it is written and no flush happens.
    pub fn write_batch(&self, trades: &[ActivityTrade]) -> Result<(), WriterError> {
        let mut session = self.inner.session();
        for (index, trade) in trades.iter().enumerate() {
            match self.inner.append_locked(&mut session, trade) {
                Ok(()) => {}
                Err(WriterError::TimeSeries(source)) => {
                    return Err(WriterError::RowRejected {
                        index,
                        transaction_hash: trade.transaction_hash.clone(),
                        source,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        self.inner.flush_locked(&mut session)
    }

    /// Send every buffered row. A failed flush keeps the rows for the next try.
    pub fn flush(&self) -> Result<(), WriterError> {
        let mut session = self.inner.session();
        self.inner.flush_locked(&mut session)
    }

    pub fn pending_rows(&self) -> usize {
        self.inner.session().sender.pending_rows()
    }

    /// Stop the timer, flush one last time, release the sender. Idempotent.
    pub fn close(&self) -> Result<(), WriterError> {
        let flusher = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(flusher) = flusher {
            flusher.stop();
        }

        let mut session = self.inner.session();
        if session.closed {
            debug!("Trade writer already closed");
            return Ok(());
        }

        if let Err(e) = self.inner.flush_locked(&mut session) {
            error!(
                error = %e,
                pending = session.sender.pending_rows(),
                "Final trade flush failed"
            );
        }
        session.closed = true;
        session.sender.close()?;
        info!(table = %self.inner.table, "Trade writer closed");
        Ok(())
    }
}

impl Drop for TradeWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Trade writer close on drop failed");
        }
    }
}

/// Async face of a `TradeWriter`. Every call runs on the blocking pool since
/// writes can wait on the flusher's lock or flush in-line.
pub struct TradeWriterSink {
    writer: Arc<TradeWriter>,
}

impl TradeWriterSink {
    pub fn new(writer: TradeWriter) -> Self {
        Self {
            writer: Arc::new(writer),
        }
    }

    pub fn writer(&self) -> &TradeWriter {
        &self.writer
    }
}

#[async_trait]
impl TradeSink for TradeWriterSink {
    fn name(&self) -> &'static str {
        "timeseries"
    }

    async fn accept(&self, trade: &ActivityTrade) -> Result<(), SinkError> {
        let writer = Arc::clone(&self.writer);
        let trade = trade.clone();
        tokio::task::spawn_blocking(move || writer.write(&trade))
            .await
            .map_err(|e| SinkError::Task(e.to_string()))?
            .map_err(SinkError::from)
    }

    async fn close(&self) -> Result<(), SinkError> {
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || writer.close())
            .await
            .map_err(|e| SinkError::Task(e.to_string()))?
            .map_err(SinkError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polymarket::Side;
    use pmi_middleware::{ColumnValue, MemoryLineSender, TimeSeriesError};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Sleeps in `flush` whenever rows are pending
    struct SlowFlushSender {
        inner: MemoryLineSender,
        delay: Duration,
    }

    impl LineSender for SlowFlushSender {
        fn append(&mut self, row: &Row) -> Result<(), TimeSeriesError> {
            self.inner.append(row)
        }

        fn flush(&mut self) -> Result<(), TimeSeriesError> {
            if self.inner.pending_rows() > 0 {
                thread::sleep(self.delay);
            }
            self.inner.flush()
        }

        fn pending_rows(&self) -> usize {
            self.inner.pending_rows()
        }

        fn discard(&mut self) -> usize {
            self.inner.discard()
        }

        fn close(&mut self) -> Result<(), TimeSeriesError> {
            self.inner.close()
        }
    }

    fn trade(hash: &str) -> ActivityTrade {
        ActivityTrade {
            side: Side::Sell,
            outcome: "No".to_string(),
            event_slug: "election".to_string(),
            price: 0.42,
            size: 10.0,
            outcome_index: 1,
            transaction_hash: hash.to_string(),
            timestamp: 1_706_000_000,
            ..Default::default()
        }
    }

    fn manual_writer(sender: &MemoryLineSender) -> TradeWriter {
        // Long timer interval so only explicit calls flush
        TradeWriter::new(
            Box::new(sender.clone()),
            TradeWriterConfig {
                flush_mode: FlushMode::BackgroundTimer(Duration::from_secs(3600)),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_trade_row_mapping() {
        let row = trade_row(DEFAULT_TABLE, &trade("0xabc"));
        assert_eq!(row.table, "polymarket_trades");
        assert_eq!(row.timestamp_nanos, 1_706_000_000_000_000_000);
        assert_eq!(row.symbol_value("side"), Some("SELL"));
        assert_eq!(row.symbol_value("outcome"), Some("No"));
        assert_eq!(row.symbol_value("event_slug"), Some("election"));
        assert_eq!(
            row.column("transaction_hash"),
            Some(&ColumnValue::Str("0xabc".to_string()))
        );
        assert_eq!(row.column("price"), Some(&ColumnValue::F64(0.42)));
        assert_eq!(row.column("outcome_index"), Some(&ColumnValue::I64(1)));
    }

    #[test]
    fn test_timestamp_saturates() {
        let mut t = trade("0x1");
        t.timestamp = i64::MAX;
        assert_eq!(trade_row(DEFAULT_TABLE, &t).timestamp_nanos, i64::MAX);
    }

    #[test]
    fn test_write_buffers_until_flush() {
        let sender = MemoryLineSender::new();
        let writer = manual_writer(&sender);

        writer.write(&trade("0x1")).unwrap();
        writer.write(&trade("0x2")).unwrap();
        assert_eq!(writer.pending_rows(), 2);
        assert!(sender.flushed_rows().is_empty());

        writer.flush().unwrap();
        assert_eq!(sender.flushed_batches().len(), 1);
        assert_eq!(sender.flushed_rows().len(), 2);
    }

    #[test]
    fn test_write_batch_stops_at_failure_without_flush() {
        let sender = MemoryLineSender::new();
        sender.reject_rows(|row| {
            row.column("transaction_hash") == Some(&ColumnValue::Str("0xt2".to_string()))
        });
        let writer = manual_writer(&sender);

        let result = writer.write_batch(&[trade("0xt1"), trade("0xt2"), trade("0xt3")]);
        match result {
            Err(WriterError::RowRejected {
                index,
                transaction_hash,
                ..
            }) => {
                assert_eq!(index, 1);
                assert_eq!(transaction_hash, "0xt2");
            }
            other => panic!("Expected RowRejected, got {:?}", other),
        }

        // t1 buffered, t3 never attempted, no implicit flush
        assert_eq!(writer.pending_rows(), 1);
        assert_eq!(sender.flush_attempts(), 0);
    }

    #[test]
    fn test_write_batch_flushes_once() {
        let sender = MemoryLineSender::new();
        let writer = manual_writer(&sender);

        writer
            .write_batch(&[trade("0x1"), trade("0x2"), trade("0x3")])
            .unwrap();
        assert_eq!(sender.flush_attempts(), 1);
        let rows = sender.flushed_rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[2].column("transaction_hash"),
            Some(&ColumnValue::Str("0x3".to_string()))
        );
    }

    #[test]
    fn test_failed_flush_keeps_rows_for_retry() {
        let sender = MemoryLineSender::new();
        let writer = manual_writer(&sender);
        sender.fail_next_flushes(1);

        writer.write(&trade("0x1")).unwrap();
        assert!(matches!(writer.flush(), Err(WriterError::FlushFailed(_))));
        assert_eq!(writer.pending_rows(), 1);

        writer.flush().unwrap();
        assert_eq!(sender.flushed_rows().len(), 1);
    }

    #[test]
    fn test_failed_flush_over_cap_discards() {
        let sender = MemoryLineSender::new();
        let writer = TradeWriter::new(
            Box::new(sender.clone()),
            TradeWriterConfig {
                flush_mode: FlushMode::BackgroundTimer(Duration::from_secs(3600)),
                max_pending_rows: 2,
                ..Default::default()
            },
        )
        .unwrap();
        sender.fail_next_flushes(1);

        for i in 0..3 {
            writer.write(&trade(&format!("0x{}", i))).unwrap();
        }
        assert!(writer.flush().is_err());
        assert_eq!(writer.pending_rows(), 0);
    }

    #[test]
    fn test_close_flushes_pending_rows() {
        let sender = MemoryLineSender::new();
        let writer = manual_writer(&sender);

        writer.write(&trade("0x1")).unwrap();
        writer.write(&trade("0x2")).unwrap();
        writer.close().unwrap();

        assert_eq!(sender.flushed_rows().len(), 2);
        assert!(sender.is_closed());
    }

    #[test]
    fn test_close_proceeds_when_final_flush_fails() {
        let sender = MemoryLineSender::new();
        let writer = manual_writer(&sender);
        sender.fail_next_flushes(1);

        writer.write(&trade("0x1")).unwrap();
        writer.close().unwrap();

        assert_eq!(sender.flush_attempts(), 1);
        assert!(sender.is_closed());
    }

    #[test]
    fn test_close_is_idempotent() {
        let sender = MemoryLineSender::new();
        let writer = manual_writer(&sender);
        writer.write(&trade("0x1")).unwrap();

        writer.close().unwrap();
        writer.close().unwrap();
        assert_eq!(sender.flush_attempts(), 1);
        assert!(matches!(writer.write(&trade("0x2")), Err(WriterError::Closed)));
        assert!(matches!(writer.flush(), Err(WriterError::Closed)));
    }

    #[test]
    fn test_background_timer_flushes() {
        let sender = MemoryLineSender::new();
        let writer = TradeWriter::new(
            Box::new(sender.clone()),
            TradeWriterConfig {
                flush_mode: FlushMode::BackgroundTimer(Duration::from_millis(10)),
                ..Default::default()
            },
        )
        .unwrap();

        writer.write(&trade("0x1")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while sender.flushed_rows().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sender.flushed_rows().len(), 1);
        writer.close().unwrap();
    }

    #[test]
    fn test_auto_mode_flushes_inline_after_interval() {
        let sender = MemoryLineSender::new();
        let writer = TradeWriter::new(
            Box::new(sender.clone()),
            TradeWriterConfig {
                flush_mode: FlushMode::Auto(Duration::ZERO),
                ..Default::default()
            },
        )
        .unwrap();

        writer.write(&trade("0x1")).unwrap();
        assert_eq!(writer.pending_rows(), 0);
        assert_eq!(sender.flushed_rows().len(), 1);
    }

    #[test]
    fn test_zero_timer_interval_uses_default() {
        assert_eq!(
            FlushMode::BackgroundTimer(Duration::ZERO).normalized(),
            FlushMode::BackgroundTimer(DEFAULT_FLUSH_INTERVAL)
        );
        assert_eq!(
            FlushMode::Auto(Duration::ZERO).normalized(),
            FlushMode::Auto(Duration::ZERO)
        );

        // Timer thread waits the default interval, so nothing flushes early
        let sender = MemoryLineSender::new();
        let writer = TradeWriter::new(
            Box::new(sender.clone()),
            TradeWriterConfig {
                flush_mode: FlushMode::BackgroundTimer(Duration::ZERO),
                ..Default::default()
            },
        )
        .unwrap();
        writer.write(&trade("0x1")).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sender.flush_attempts(), 0);
        writer.close().unwrap();
        assert_eq!(sender.flushed_rows().len(), 1);
    }

    #[test]
    fn test_flush_mode_for_protocol() {
        let interval = Duration::from_secs(1);
        assert_eq!(
            FlushMode::for_protocol(IlpProtocol::Tcp, interval),
            FlushMode::BackgroundTimer(interval)
        );
        assert_eq!(
            FlushMode::for_protocol(IlpProtocol::Http, interval),
            FlushMode::Auto(interval)
        );
    }

    #[tokio::test]
    async fn test_sink_accept_keeps_runtime_responsive() {
        let sender = MemoryLineSender::new();
        let writer = TradeWriter::new(
            Box::new(SlowFlushSender {
                inner: sender.clone(),
                delay: Duration::from_millis(200),
            }),
            TradeWriterConfig {
                flush_mode: FlushMode::Auto(Duration::ZERO),
                ..Default::default()
            },
        )
        .unwrap();
        let sink = TradeWriterSink::new(writer);

        let ticks = Arc::new(AtomicU64::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        tokio::task::yield_now().await;

        sink.accept(&trade("0x1")).await.unwrap();
        ticker.abort();

        // In-line flush ran on the blocking pool while the ticker kept going
        assert_eq!(sender.flushed_rows().len(), 1);
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_sink_close_runs_final_flush() {
        let sender = MemoryLineSender::new();
        let sink = TradeWriterSink::new(manual_writer(&sender));

        sink.accept(&trade("0x1")).await.unwrap();
        TradeSink::close(&sink).await.unwrap();
        TradeSink::close(&sink).await.unwrap();

        assert_eq!(sender.flushed_rows().len(), 1);
        assert!(sender.is_closed());
    }
}
