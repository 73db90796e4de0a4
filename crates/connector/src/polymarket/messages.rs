//! Polymarket real-time data (live-data) WebSocket message types
//!
//! Outbound: `{"action":"subscribe"|"unsubscribe","subscriptions":[...]}` control messages.
//! Inbound: `{"topic","type","timestamp","connection_id","payload"}` envelopes.
//!
//! Activity trade payloads carry prices as JSON numbers (probabilities in [0, 1])
//! and timestamps as Unix seconds.

use std::borrow::Cow;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

pub const TOPIC_ACTIVITY: &str = "activity";
pub const TOPIC_COMMENTS: &str = "comments";
pub const TOPIC_CLOB_USER: &str = "clob_user";

pub const TYPE_TRADES: &str = "trades";
pub const TYPE_ALL: &str = "*";

/// Credentials for the private `clob_user` topic
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ClobAuth {
    pub key: String,
    pub secret: String,
    pub passphrase: String,
}

impl fmt::Debug for ClobAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClobAuth")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// One topic subscription intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clob_auth: Option<ClobAuth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<String>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind: kind.into(),
            clob_auth: None,
            filters: None,
        }
    }

    /// Public trade activity across all markets
    pub fn activity_trades() -> Self {
        Self::new(TOPIC_ACTIVITY, TYPE_TRADES)
    }

    /// Every activity message type
    pub fn activity_all() -> Self {
        Self::new(TOPIC_ACTIVITY, TYPE_ALL)
    }

    pub fn comments() -> Self {
        Self::new(TOPIC_COMMENTS, TYPE_ALL)
    }

    /// Private order and trade updates for the authenticated user
    pub fn clob_user(auth: ClobAuth) -> Self {
        Self {
            clob_auth: Some(auth),
            ..Self::new(TOPIC_CLOB_USER, TYPE_ALL)
        }
    }

    pub fn with_filters(mut self, filters: impl Into<String>) -> Self {
        self.filters = Some(filters.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// Control message sent as a single text frame
#[derive(Debug, Serialize)]
pub struct SubscriptionMessage<'a> {
    pub action: SubscriptionAction,
    pub subscriptions: &'a [Subscription],
}

/// Outer wrapper of every inbound feed message.
///
/// Borrows from the frame; `payload` stays undecoded until the topic/type match.
/// String fields that are absent or `null` are empty.
#[derive(Debug, Deserialize)]
pub struct Envelope<'a> {
    #[serde(default, deserialize_with = "cow_str_or_null")]
    pub topic: Cow<'a, str>,
    #[serde(rename = "type", default, deserialize_with = "cow_str_or_null")]
    pub kind: Cow<'a, str>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "cow_str_or_null")]
    pub connection_id: Cow<'a, str>,
    #[serde(borrow, default)]
    pub payload: Option<&'a RawValue>,
}

impl Envelope<'_> {
    pub fn is_activity_trade(&self) -> bool {
        self.topic == TOPIC_ACTIVITY && self.kind == TYPE_TRADES
    }
}

/// Trade direction from the taker's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Side {
    Buy,
    Sell,
    /// Absent or unrecognised on the wire
    #[default]
    Unknown,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
            Side::Unknown => "",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Side {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<Cow<'de, str>> = Option::deserialize(deserializer)?;
        Ok(match raw.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("buy") => Side::Buy,
            Some(s) if s.eq_ignore_ascii_case("sell") => Side::Sell,
            _ => Side::Unknown,
        })
    }
}

/// Treat an explicit JSON `null` the same as an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Borrow the string from the input when it has no escapes; `null` is empty
fn cow_str_or_null<'de: 'a, 'a, D>(deserializer: D) -> Result<Cow<'a, str>, D::Error>
where
    D: Deserializer<'de>,
{
    struct CowStr;

    impl<'de> Visitor<'de> for CowStr {
        type Value = Cow<'de, str>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or null")
        }

        fn visit_borrowed_str<E: de::Error>(self, v: &'de str) -> Result<Self::Value, E> {
            Ok(Cow::Borrowed(v))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Cow::Owned(v.to_owned()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(Cow::Owned(v))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Cow::Borrowed(""))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Cow::Borrowed(""))
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_str(CowStr)
        }
    }

    deserializer.deserialize_option(CowStr)
}

/// An executed trade from the `activity/trades` stream.
///
/// String fields are empty and numeric fields zero when the feed omits them.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(from = "WireTrade")]
pub struct ActivityTrade {
    /// ERC-1155 outcome token id
    pub asset: String,
    pub condition_id: String,
    pub question_id: String,
    pub transaction_hash: String,

    pub side: Side,
    pub outcome: String,
    pub outcome_index: i64,

    /// Probability in [0, 1]
    pub price: f64,
    pub size: f64,
    pub fee: f64,

    pub market_slug: String,
    pub event_slug: String,
    /// Market question
    pub title: String,
    pub event_title: String,
    pub proxy_wallet: String,
    pub name: String,
    pub pseudonym: String,

    /// Unix seconds
    pub timestamp: i64,
}

/// Trade payload as sent. Older messages use `outcomeTitle`, `marketSlug` and
/// `proxyWalletAddress`; some carry both spellings.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireTrade {
    #[serde(deserialize_with = "null_as_default")]
    asset: String,
    #[serde(deserialize_with = "null_as_default")]
    condition_id: String,
    #[serde(deserialize_with = "null_as_default")]
    question_id: String,
    #[serde(deserialize_with = "null_as_default")]
    transaction_hash: String,
    side: Side,
    #[serde(deserialize_with = "null_as_default")]
    outcome: String,
    #[serde(deserialize_with = "null_as_default")]
    outcome_title: String,
    #[serde(deserialize_with = "null_as_default")]
    outcome_index: i64,
    #[serde(deserialize_with = "null_as_default")]
    price: f64,
    #[serde(deserialize_with = "null_as_default")]
    size: f64,
    #[serde(deserialize_with = "null_as_default")]
    fee: f64,
    #[serde(deserialize_with = "null_as_default")]
    slug: String,
    #[serde(deserialize_with = "null_as_default")]
    market_slug: String,
    #[serde(deserialize_with = "null_as_default")]
    event_slug: String,
    #[serde(deserialize_with = "null_as_default")]
    title: String,
    #[serde(deserialize_with = "null_as_default")]
    event_title: String,
    #[serde(deserialize_with = "null_as_default")]
    proxy_wallet: String,
    #[serde(deserialize_with = "null_as_default")]
    proxy_wallet_address: String,
    #[serde(deserialize_with = "null_as_default")]
    name: String,
    #[serde(deserialize_with = "null_as_default")]
    pseudonym: String,
    #[serde(deserialize_with = "null_as_default")]
    timestamp: i64,
}

/// Current field name wins unless it is empty
fn current_or_legacy(current: String, legacy: String) -> String {
    if current.is_empty() {
        legacy
    } else {
        current
    }
}

impl From<WireTrade> for ActivityTrade {
    fn from(wire: WireTrade) -> Self {
        Self {
            asset: wire.asset,
            condition_id: wire.condition_id,
            question_id: wire.question_id,
            transaction_hash: wire.transaction_hash,
            side: wire.side,
            outcome: current_or_legacy(wire.outcome, wire.outcome_title),
            outcome_index: wire.outcome_index,
            price: wire.price,
            size: wire.size,
            fee: wire.fee,
            market_slug: current_or_legacy(wire.slug, wire.market_slug),
            event_slug: wire.event_slug,
            title: wire.title,
            event_title: wire.event_title,
            proxy_wallet: current_or_legacy(wire.proxy_wallet, wire.proxy_wallet_address),
            name: wire.name,
            pseudonym: wire.pseudonym,
            timestamp: wire.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIVITY_TRADE: &str = r#"{"asset":"21742633143463906290569050155826241533067272736897614950488156847949938836455","conditionId":"0x1234abcd","eventSlug":"fed-decision-in-march","outcome":"Yes","outcomeIndex":0,"price":0.55,"proxyWallet":"0xwallet","pseudonym":"Quiet-Trader","side":"BUY","size":100,"slug":"fed-cuts-rates","timestamp":1706000000,"title":"Will the Fed cut rates?","transactionHash":"0xabc"}"#;

    #[test]
    fn test_subscribe_message_shape() {
        let subs = vec![Subscription::activity_trades()];
        let msg = SubscriptionMessage {
            action: SubscriptionAction::Subscribe,
            subscriptions: &subs,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"action":"subscribe","subscriptions":[{"topic":"activity","type":"trades"}]}"#
        );
    }

    #[test]
    fn test_clob_user_subscription_carries_auth() {
        let sub = Subscription::clob_user(ClobAuth {
            key: "k".to_string(),
            secret: "s".to_string(),
            passphrase: "p".to_string(),
        });
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["topic"], "clob_user");
        assert_eq!(json["type"], "*");
        assert_eq!(json["clob_auth"]["key"], "k");
        assert_eq!(json["clob_auth"]["passphrase"], "p");
        assert!(json.get("filters").is_none());
    }

    #[test]
    fn test_clob_auth_debug_redacts_secrets() {
        let auth = ClobAuth {
            key: "k".to_string(),
            secret: "topsecret".to_string(),
            passphrase: "hunter2".to_string(),
        };
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("topsecret"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_filters_serialized_when_set() {
        let sub = Subscription::activity_trades().with_filters(r#"{"event_slug":"x"}"#);
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["filters"], r#"{"event_slug":"x"}"#);
    }

    #[test]
    fn test_parse_activity_trade() {
        let trade: ActivityTrade = serde_json::from_str(ACTIVITY_TRADE).unwrap();
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.price, 0.55);
        assert_eq!(trade.size, 100.0);
        assert_eq!(trade.transaction_hash, "0xabc");
        assert_eq!(trade.market_slug, "fed-cuts-rates");
        assert_eq!(trade.event_slug, "fed-decision-in-march");
        assert_eq!(trade.outcome, "Yes");
        assert_eq!(trade.proxy_wallet, "0xwallet");
        assert_eq!(trade.timestamp, 1706000000);
        assert_eq!(trade.fee, 0.0);
        assert!(trade.question_id.is_empty());
    }

    #[test]
    fn test_parse_trade_legacy_field_names() {
        let json = r#"{"side":"sell","marketSlug":"m","outcomeTitle":"No","proxyWalletAddress":"0xw"}"#;
        let trade: ActivityTrade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.market_slug, "m");
        assert_eq!(trade.outcome, "No");
        assert_eq!(trade.proxy_wallet, "0xw");
    }

    #[test]
    fn test_parse_trade_both_field_spellings() {
        let json = r#"{"outcome":"Yes","outcomeTitle":"Yes (old)","slug":"m","marketSlug":"m-old","proxyWallet":"","proxyWalletAddress":"0xw"}"#;
        let trade: ActivityTrade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.outcome, "Yes");
        assert_eq!(trade.market_slug, "m");
        // Empty current name falls back to the legacy one
        assert_eq!(trade.proxy_wallet, "0xw");
    }

    #[test]
    fn test_parse_trade_nulls_default() {
        let json = r#"{"side":null,"price":null,"transactionHash":null,"outcomeIndex":null}"#;
        let trade: ActivityTrade = serde_json::from_str(json).unwrap();
        assert_eq!(trade, ActivityTrade::default());
    }

    #[test]
    fn test_envelope_borrows_payload() {
        let frame = format!(
            r#"{{"topic":"activity","type":"trades","timestamp":1706000000,"connection_id":"abc=","payload":{}}}"#,
            ACTIVITY_TRADE
        );
        let envelope: Envelope = serde_json::from_str(&frame).unwrap();
        assert!(envelope.is_activity_trade());
        assert_eq!(envelope.timestamp, 1706000000);
        assert_eq!(envelope.connection_id, "abc=");
        assert_eq!(envelope.payload.map(RawValue::get), Some(ACTIVITY_TRADE));
    }

    #[test]
    fn test_envelope_null_strings_are_empty() {
        let frame = r#"{"topic":null,"type":null,"timestamp":null,"connection_id":null,"payload":{}}"#;
        let envelope: Envelope = serde_json::from_str(frame).unwrap();
        assert_eq!(envelope.topic, "");
        assert_eq!(envelope.kind, "");
        assert_eq!(envelope.connection_id, "");
        assert!(!envelope.is_activity_trade());
    }

    #[test]
    fn test_envelope_rejects_non_string_topic() {
        let frame = r#"{"topic":7,"type":"trades"}"#;
        assert!(serde_json::from_str::<Envelope>(frame).is_err());
    }

    #[test]
    fn test_side_display() {
        assert_eq!(Side::Buy.to_string(), "BUY");
        assert_eq!(Side::Sell.to_string(), "SELL");
        assert_eq!(Side::Unknown.to_string(), "");
    }
}
