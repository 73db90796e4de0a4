use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("flush failed: {0}")]
    FlushFailed(String),
    #[error("stream setup failed: {0}")]
    StreamSetup(String),
}

#[derive(Error, Debug)]
pub enum TimeSeriesError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("row rejected: {0}")]
    RowRejected(String),
    #[error("flush failed: {0}")]
    FlushFailed(String),
    #[error("sender closed")]
    Closed,
}
