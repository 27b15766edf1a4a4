//! Price stream message types.
//!
//! Ticks arrive on a multiplexed ("combined") stream: every frame is an
//! envelope `{"stream": "btcusdt@markPrice@1s", "data": {...}}` whose `data`
//! is the per-symbol event. Only the symbol (`s`) and price (`p`) are read.

use serde::Deserialize;
use std::collections::BTreeSet;
use tranche_core::Price;

/// One price observation for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTick {
    /// Uppercased instrument symbol (e.g. "BTCUSDT").
    pub symbol: String,
    pub price: Price,
}

#[derive(Debug, Deserialize)]
struct CombinedEnvelope {
    #[allow(dead_code)]
    stream: String,
    data: TickEvent,
}

#[derive(Debug, Deserialize)]
struct TickEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: Price,
}

/// Parse a text frame into a tick.
///
/// Accepts the combined-stream envelope and a bare event. Anything else
/// (subscription replies, other event types, garbage) yields `None`.
pub fn parse_tick(text: &str) -> Option<PriceTick> {
    let event = match serde_json::from_str::<CombinedEnvelope>(text) {
        Ok(envelope) => envelope.data,
        Err(_) => serde_json::from_str::<TickEvent>(text).ok()?,
    };

    if !event.price.is_positive() || event.symbol.is_empty() {
        return None;
    }

    Some(PriceTick {
        symbol: event.symbol.to_ascii_uppercase(),
        price: event.price,
    })
}

/// Build the combined-stream URL covering `symbols`.
///
/// Symbols are lowercased, deduplicated and sorted so the same key set
/// always produces the same URL.
pub fn combined_stream_url<'a, I>(base: &str, symbols: I, topic: &str) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    let streams: BTreeSet<String> = symbols
        .into_iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    let joined = streams
        .iter()
        .map(|s| format!("{s}@{topic}"))
        .collect::<Vec<_>>()
        .join("/");

    format!("{}?streams={}", base.trim_end_matches('/'), joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_combined_envelope() {
        let text = r#"{"stream":"btcusdt@markPrice@1s","data":{"e":"markPriceUpdate","E":1700000000000,"s":"BTCUSDT","p":"43012.50","r":"0.0001"}}"#;
        let tick = parse_tick(text).unwrap();
        assert_eq!(tick.symbol, "BTCUSDT");
        assert_eq!(tick.price, Price::new(dec!(43012.50)));
    }

    #[test]
    fn test_parse_bare_event() {
        let text = r#"{"e":"markPriceUpdate","s":"ethusdt","p":"2250.1"}"#;
        let tick = parse_tick(text).unwrap();
        assert_eq!(tick.symbol, "ETHUSDT");
        assert_eq!(tick.price, Price::new(dec!(2250.1)));
    }

    #[test]
    fn test_non_tick_frames_are_ignored() {
        assert!(parse_tick(r#"{"result":null,"id":1}"#).is_none());
        assert!(parse_tick("not json").is_none());
        assert!(parse_tick(r#"{"stream":"x","data":{"s":"BTCUSDT","p":"0"}}"#).is_none());
    }

    #[test]
    fn test_combined_stream_url_is_canonical() {
        let symbols = vec![
            "ETHUSDT".to_string(),
            "btcusdt".to_string(),
            "BTCUSDT".to_string(),
        ];
        let url = combined_stream_url("wss://fstream.binance.com/stream/", &symbols, "markPrice@1s");
        assert_eq!(
            url,
            "wss://fstream.binance.com/stream?streams=btcusdt@markPrice@1s/ethusdt@markPrice@1s"
        );
    }
}
