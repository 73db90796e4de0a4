//! pmi-connector: Polymarket trade ingestion pipeline
//!
//! Live-data WebSocket client, frame classifier, and the sinks trades are
//! forwarded to (broker topic, time-series table), plus the health server.

pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod polymarket;
pub mod producer;
pub mod server;
pub mod trade_writer;
pub mod traits;

pub use error::{ConnectorError, ParseError, ProducerError, SinkError, WriterError};
pub use pipeline::{Pipeline, TradeHandler};
pub use producer::{partition_key, TradeMessage, TradeProducer};
pub use server::{create_router, run_server, ServerState};
pub use trade_writer::{FlushMode, TradeWriter, TradeWriterConfig, TradeWriterSink};
pub use traits::{FrameHandler, TradeSink};
