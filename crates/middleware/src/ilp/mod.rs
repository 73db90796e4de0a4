//! InfluxDB line protocol (ILP) sender for QuestDB
mod sender;

pub use sender::{IlpProtocol, QuestDbSender};
