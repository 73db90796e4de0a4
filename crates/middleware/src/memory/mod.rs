//! In-memory implementations for testing
pub mod timeseries;
pub mod transport;

pub use timeseries::MemoryLineSender;
pub use transport::InMemoryTransport;
