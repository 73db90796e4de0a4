//! pmi-middleware: Pluggable sink backends
//!
//! Trait-based abstractions for the two downstream systems the ingest pipeline
//! writes to: a pub/sub `Transport` (broker topic) and a `LineSender`
//! (time-series table), with in-memory implementations for testing.

pub mod error;
pub mod ilp;
pub mod memory;
pub mod nats;
pub mod timeseries;
pub mod transport;

pub use error::{TimeSeriesError, TransportError};
pub use ilp::{IlpProtocol, QuestDbSender};
pub use memory::{InMemoryTransport, MemoryLineSender};
pub use nats::{
    keyed_subject, sanitize_subject_token, NatsTransport, TopicSubjects, PARTITION_KEY_HEADER,
};
pub use timeseries::{ColumnValue, LineSender, Row};
pub use transport::{DeliveryFuture, OutboundRecord, Transport};
