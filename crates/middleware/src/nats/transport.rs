use std::time::Duration;

use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, Context};
use async_nats::Client;
use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::info;

use crate::error::TransportError;
use crate::nats::subjects::{keyed_subject, TopicSubjects};
use crate::transport::{DeliveryFuture, OutboundRecord, Transport};

/// Header carrying the partition key alongside the subject token
pub const PARTITION_KEY_HEADER: &str = "Partition-Key";

/// How long JetStream keeps published trades
const STREAM_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// NATS JetStream transport.
///
/// `OutboundRecord::topic` is the subject prefix; the key becomes the final
/// subject token (see [`TopicSubjects`]).
pub struct NatsTransport {
    client: Client,
    jetstream: Context,
}

impl NatsTransport {
    /// Create a new NatsTransport from an existing client
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self { client, jetstream }
    }

    /// Connect to a comma-separated server list, e.g. `nats://a:4222,nats://b:4222`
    pub async fn connect(servers: &str) -> Result<Self, TransportError> {
        let client = async_nats::connect(servers)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        info!(servers = %servers, "Connected to NATS");
        Ok(Self::new(client))
    }

    /// Get JetStream context for stream operations
    pub fn jetstream(&self) -> &Context {
        &self.jetstream
    }

    /// Create the stream backing a topic if it does not exist yet
    pub async fn ensure_stream(&self, subjects: &TopicSubjects) -> Result<(), TransportError> {
        let config = Config {
            name: subjects.stream_name().to_string(),
            subjects: subjects.stream_subjects(),
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            max_age: STREAM_MAX_AGE,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| TransportError::StreamSetup(e.to_string()))?;

        info!(
            stream = %subjects.stream_name(),
            topic = %subjects.topic(),
            "JetStream stream ready"
        );
        Ok(())
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, record: OutboundRecord) -> Result<DeliveryFuture, TransportError> {
        let subject = keyed_subject(&record.topic, record.key.as_deref());

        let mut headers = async_nats::HeaderMap::new();
        for (name, value) in record.headers {
            headers.insert(name, value);
        }
        if let Some(key) = record.key.as_deref() {
            headers.insert(
                PARTITION_KEY_HEADER,
                String::from_utf8_lossy(key).into_owned(),
            );
        }

        let ack = self
            .jetstream
            .publish_with_headers(subject, headers, record.payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;

        Ok(async move {
            ack.await
                .map(|_| ())
                .map_err(|e| TransportError::DeliveryFailed(e.to_string()))
        }
        .boxed())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::FlushFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    // Note: These tests require a running NATS server with JetStream
    // Run: docker run -p 4222:4222 nats:latest -js

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_publish_is_acknowledged() {
        let transport = NatsTransport::connect("nats://localhost:4222").await.unwrap();
        let subjects = TopicSubjects::new("test.trades");
        transport.ensure_stream(&subjects).await.unwrap();

        let record = OutboundRecord::new("test.trades", Bytes::from_static(b"{}"))
            .with_key(Bytes::from_static(b"0xabc"));
        let delivery = transport.publish(record).await.unwrap();
        assert!(delivery.await.is_ok());
    }
}
