use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::error::TransportError;
use crate::transport::{DeliveryFuture, OutboundRecord, Transport};

/// Transport that keeps every published record in memory.
///
/// Delivery and publish failures can be injected to exercise error paths.
#[derive(Default)]
pub struct InMemoryTransport {
    published: Mutex<Vec<OutboundRecord>>,
    fail_publish: AtomicBool,
    fail_delivery: AtomicBool,
    deliveries_acked: AtomicU64,
    flushes: AtomicUsize,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `publish` calls fail before anything is queued
    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent deliveries resolve with an error
    pub fn fail_delivery(&self, fail: bool) {
        self.fail_delivery.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of every record accepted so far, in publish order
    pub fn published(&self) -> Vec<OutboundRecord> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn deliveries_acked(&self) -> u64 {
        self.deliveries_acked.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, record: OutboundRecord) -> Result<DeliveryFuture, TransportError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed("injected publish failure".to_string()));
        }

        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);

        if self.fail_delivery.load(Ordering::SeqCst) {
            return Ok(futures_util::future::ready(Err(TransportError::DeliveryFailed(
                "injected delivery failure".to_string(),
            )))
            .boxed());
        }
        self.deliveries_acked.fetch_add(1, Ordering::SeqCst);
        Ok(futures_util::future::ready(Ok(())).boxed())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
