//! Frame classifier for the live-data feed
//!
//! Runs on every frame, so the common case (keepalive replies and topics we do
//! not consume) is rejected before any full JSON parse.

use serde::de;

use crate::error::ParseError;
use crate::polymarket::messages::{ActivityTrade, Envelope};

/// Outcome of classifying one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Trade(ActivityTrade),
    /// Not a trade; drop silently
    Skip,
}

/// Classify a raw frame as an activity trade or something to skip.
///
/// Empty frames and frames that do not start with `{` are skipped without
/// parsing. Object-shaped frames that fail to decode are a `ParseError`.
pub fn classify(frame: &[u8]) -> Result<Classified, ParseError> {
    match frame.first() {
        Some(b'{') => {}
        _ => return Ok(Classified::Skip),
    }

    let envelope: Envelope = serde_json::from_slice(frame).map_err(ParseError::Envelope)?;
    if !envelope.is_activity_trade() {
        return Ok(Classified::Skip);
    }

    let payload = envelope.payload.ok_or(ParseError::MissingPayload)?;
    // Only an object is a trade; an array would decode by field position
    if !payload.get().starts_with('{') {
        return Err(ParseError::Payload(de::Error::custom(
            "trade payload is not a JSON object",
        )));
    }
    let trade: ActivityTrade =
        serde_json::from_str(payload.get()).map_err(ParseError::Payload)?;
    Ok(Classified::Trade(trade))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polymarket::messages::Side;

    const HAPPY_PATH: &[u8] = br#"{"topic":"activity","type":"trades","payload":{"side":"BUY","price":0.55,"size":100,"transactionHash":"0xabc"}}"#;

    fn expect_trade(frame: &[u8]) -> ActivityTrade {
        match classify(frame) {
            Ok(Classified::Trade(trade)) => trade,
            other => panic!("Expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_happy_path_trade() {
        let trade = expect_trade(HAPPY_PATH);
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.price, 0.55);
        assert_eq!(trade.size, 100.0);
        assert_eq!(trade.transaction_hash, "0xabc");
    }

    #[test]
    fn test_empty_frame_skipped() {
        assert_eq!(classify(b"").unwrap(), Classified::Skip);
    }

    #[test]
    fn test_non_object_frames_skipped() {
        let frames: [&[u8]; 7] = [
            b"pong",
            b"PONG",
            b"[1,2,3]",
            b" {\"topic\":\"activity\"}",
            b"\x00\xff\xfe",
            b"not json at all {",
            b"\"string\"",
        ];
        for frame in frames {
            assert_eq!(classify(frame).unwrap(), Classified::Skip, "frame {:?}", frame);
        }
    }

    #[test]
    fn test_other_topics_skipped() {
        let frames: [&[u8]; 4] = [
            br#"{"topic":"comments","type":"comment_created","payload":{"body":"hi"}}"#,
            br#"{"topic":"activity","type":"orders_matched","payload":{"side":"BUY"}}"#,
            br#"{"topic":"crypto_prices","type":"trades","payload":{}}"#,
            br#"{"connection_id":"abc"}"#,
        ];
        for frame in frames {
            assert_eq!(classify(frame).unwrap(), Classified::Skip);
        }
    }

    #[test]
    fn test_skipped_topic_payload_never_decoded() {
        // Payload is not a trade shape at all; must still be a quiet skip
        let frame = br#"{"topic":"comments","type":"trades","payload":[1,"x",null]}"#;
        assert_eq!(classify(frame).unwrap(), Classified::Skip);
    }

    #[test]
    fn test_malformed_object_is_parse_error() {
        let result = classify(br#"{"topic":"activity","type":"#);
        assert!(matches!(result, Err(ParseError::Envelope(_))));
    }

    #[test]
    fn test_malformed_trade_payload_is_parse_error() {
        let frame = br#"{"topic":"activity","type":"trades","payload":{"price":"not-a-number"}}"#;
        assert!(matches!(classify(frame), Err(ParseError::Payload(_))));

        let frames: [&[u8]; 4] = [
            br#"{"topic":"activity","type":"trades","payload":[]}"#,
            br#"{"topic":"activity","type":"trades","payload":["0xdead"]}"#,
            br#"{"topic":"activity","type":"trades","payload":"0xdead"}"#,
            br#"{"topic":"activity","type":"trades","payload":42}"#,
        ];
        for frame in frames {
            assert!(
                matches!(classify(frame), Err(ParseError::Payload(_))),
                "frame {}",
                String::from_utf8_lossy(frame)
            );
        }
    }

    #[test]
    fn test_null_envelope_strings() {
        let frame = br#"{"topic":"activity","type":"trades","connection_id":null,"payload":{"size":2}}"#;
        assert_eq!(expect_trade(frame).size, 2.0);

        let frame = br#"{"topic":null,"type":"trades","payload":{"size":2}}"#;
        assert_eq!(classify(frame).unwrap(), Classified::Skip);
    }

    #[test]
    fn test_any_first_byte_but_brace_is_skipped() {
        let tails: [&[u8]; 4] = [
            b"",
            HAPPY_PATH,
            br#""topic":"activity","type":"trades"}"#,
            b"\xff\x00garbage",
        ];
        for first in (0..=u8::MAX).filter(|&b| b != b'{') {
            for tail in tails {
                let mut frame = vec![first];
                frame.extend_from_slice(tail);
                assert_eq!(classify(&frame).unwrap(), Classified::Skip, "frame {:?}", frame);
            }
        }
    }

    #[test]
    fn test_generated_non_object_frames_are_skipped() {
        // Deterministic xorshift so failures reproduce
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        for _ in 0..2_000 {
            let len = (next() % 64) as usize + 1;
            let mut frame: Vec<u8> = (0..len).map(|_| next() as u8).collect();
            if frame[0] == b'{' {
                frame[0] = b'[';
            }
            assert_eq!(classify(&frame).unwrap(), Classified::Skip, "frame {:?}", frame);
        }
    }

    #[test]
    fn test_trade_without_payload_is_parse_error() {
        let frame = br#"{"topic":"activity","type":"trades","timestamp":1706000000}"#;
        assert!(matches!(classify(frame), Err(ParseError::MissingPayload)));

        let frame = br#"{"topic":"activity","type":"trades","payload":null}"#;
        assert!(matches!(classify(frame), Err(ParseError::MissingPayload)));
    }

    #[test]
    fn test_absent_fields_default() {
        let trade = expect_trade(br#"{"topic":"activity","type":"trades","payload":{}}"#);
        assert_eq!(trade, ActivityTrade::default());
        assert_eq!(trade.side, Side::Unknown);
    }

    #[test]
    fn test_escaped_topic_still_matches() {
        let frame = br#"{"topic":"activ\u0069ty","type":"trades","payload":{"size":1}}"#;
        assert_eq!(expect_trade(frame).size, 1.0);
    }
}
