use pmi_middleware::{TimeSeriesError, TransportError};
use thiserror::Error;

/// Connection-level failures. Any of these ends the current `run`.
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("no frame received for {0:?}")]
    ReadTimeout(std::time::Duration),
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
}

/// A frame looked like a feed message but could not be decoded
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("malformed trade payload: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("trade envelope has no payload")]
    MissingPayload,
}

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("producer closed")]
    Closed,
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("writer closed")]
    Closed,
    #[error("row {index} (tx {transaction_hash}) rejected: {source}")]
    RowRejected {
        index: usize,
        transaction_hash: String,
        #[source]
        source: TimeSeriesError,
    },
    #[error("flush failed: {0}")]
    FlushFailed(#[source] TimeSeriesError),
    #[error(transparent)]
    TimeSeries(#[from] TimeSeriesError),
}

/// Failure reported by a pipeline sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Producer(#[from] ProducerError),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error("sink task failed: {0}")]
    Task(String),
}
