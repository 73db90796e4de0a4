use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SinkError;
use crate::polymarket::ActivityTrade;

/// Receives every non-keepalive frame, in-line on the read loop.
///
/// A slow handler backpressures the socket; there is no queue in between.
#[async_trait]
pub trait FrameHandler: Send {
    async fn on_frame(&mut self, frame: Bytes);
}

#[async_trait]
impl<F> FrameHandler for F
where
    F: FnMut(Bytes) + Send,
{
    async fn on_frame(&mut self, frame: Bytes) {
        self(frame)
    }
}

/// Destination for parsed trades (broker topic, time-series table, ...)
#[async_trait]
pub trait TradeSink: Send + Sync {
    /// Short name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Accept one trade. Runs on the read loop, so it must not block for long.
    async fn accept(&self, trade: &ActivityTrade) -> Result<(), SinkError>;

    /// Flush and release the sink. Safe to call more than once.
    async fn close(&self) -> Result<(), SinkError>;
}
