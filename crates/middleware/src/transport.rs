use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::error::TransportError;

/// Resolves once the broker has acknowledged (or rejected) a published record.
pub type DeliveryFuture = BoxFuture<'static, Result<(), TransportError>>;

/// A record bound for a broker topic
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub topic: String,
    /// Partition key. Records sharing a key keep their relative order;
    /// `None` leaves placement to the broker.
    pub key: Option<Bytes>,
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Transport abstraction for publishing to a broker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand a record to the client. Returns as soon as the record is queued;
    /// the returned future tracks the broker acknowledgement.
    async fn publish(&self, record: OutboundRecord) -> Result<DeliveryFuture, TransportError>;

    /// Push any client-side buffered records onto the wire
    async fn flush(&self) -> Result<(), TransportError>;
}
