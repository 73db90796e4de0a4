pub mod subjects;
mod transport;

pub use subjects::{keyed_subject, sanitize_subject_token, TopicSubjects};
pub use transport::{NatsTransport, PARTITION_KEY_HEADER};
