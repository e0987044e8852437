//! Market-data update event.
//!
//! The relay never parses these on the hot path; payloads are forwarded as
//! opaque bytes. The typed form exists for producers, tooling and tests.

use serde::{Deserialize, Serialize};

/// One ticker snapshot for an asset pair, as published on the update channel.
///
/// Numeric fields are optional because exchanges omit them for thin markets;
/// a missing value is serialized as `null`, matching what the publisher emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Asset pair identifier, e.g. `BTC/USDT`.
    pub symbol: String,
    /// Last traded price.
    pub price: Option<f64>,
    /// Exchange timestamp in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Absolute 24h change.
    pub change: Option<f64>,
    /// Relative 24h change in percent.
    pub percentage: Option<f64>,
    /// 24h quote volume.
    pub volume: Option<f64>,
    /// Price 24h ago.
    pub open_24h: Option<f64>,
    /// 24h high.
    pub high_24h: Option<f64>,
    /// 24h low.
    pub low_24h: Option<f64>,
    /// Best bid.
    pub bid: Option<f64>,
    /// Best ask.
    pub ask: Option<f64>,
}

impl UpdateEvent {
    /// An event carrying only a symbol and price.
    pub fn price_only(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price: Some(price),
            timestamp: None,
            change: None,
            percentage: None,
            volume: None,
            open_24h: None,
            high_24h: None,
            low_24h: None,
            bid: None,
            ask: None,
        }
    }

    /// Serialize to the wire form published on the channel.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
