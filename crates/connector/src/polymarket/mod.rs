//! Polymarket live-data feed
//!
//! Real-time activity stream: WebSocket client, message types and the frame
//! classifier. No authentication required for public topics.

pub mod messages;
pub mod parser;
pub mod websocket;

pub use messages::{
    ActivityTrade, ClobAuth, Envelope, Side, Subscription, SubscriptionAction,
    SubscriptionMessage,
};
pub use parser::{classify, Classified};
pub use websocket::{
    ConnectionState, LiveDataClient, LiveDataConfig, LiveDataHandle, LIVE_DATA_WS_URL,
    PING_INTERVAL,
};
