use model::{Bar, BarSource, Interval};
use serde::{Deserialize, Deserializer};

fn de_f64_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// The nested `k` object of a kline event.
#[derive(Debug, Deserialize)]
pub struct BinanceKlineRaw {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o", deserialize_with = "de_f64_str")]
    pub open: f64,
    #[serde(rename = "h", deserialize_with = "de_f64_str")]
    pub high: f64,
    #[serde(rename = "l", deserialize_with = "de_f64_str")]
    pub low: f64,
    #[serde(rename = "c", deserialize_with = "de_f64_str")]
    pub close: f64,
    #[serde(rename = "v", deserialize_with = "de_f64_str")]
    pub volume: f64,
    #[serde(rename = "n")]
    pub trades: i64,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

#[derive(Debug, Deserialize)]
pub struct BinanceKlineEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: BinanceKlineRaw,
}

#[derive(Debug, Deserialize)]
pub struct CombinedStreamWrapper {
    #[allow(dead_code)]
    pub stream: String,
    pub data: BinanceKlineEvent,
}

pub enum ParsedMessage {
    Kline(Bar),
    /// Kline for an interval we did not subscribe to, or a non-kline event.
    Unknown,
}

impl BinanceKlineRaw {
    fn into_bar(self) -> Option<Bar> {
        let interval: Interval = self.interval.parse().ok()?;
        Some(Bar {
            interval,
            open_time: self.open_time,
            close_time: self.close_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            trades: self.trades,
            is_closed: self.is_closed,
            source: BarSource::Ws,
        })
    }
}

pub fn parse_message(text: &str) -> Result<ParsedMessage, serde_json::Error> {
    // Combined stream format carries a "stream" routing field
    if text.contains("\"stream\"") {
        let wrapper: CombinedStreamWrapper = serde_json::from_str(text)?;
        if wrapper.data.event_type == "kline" {
            if let Some(bar) = wrapper.data.kline.into_bar() {
                return Ok(ParsedMessage::Kline(bar));
            }
        }
        return Ok(ParsedMessage::Unknown);
    }

    // Raw single-stream format
    let raw: serde_json::Value = serde_json::from_str(text)?;
    if let Some(event_type) = raw.get("e").and_then(|v| v.as_str()) {
        if event_type == "kline" {
            let event: BinanceKlineEvent = serde_json::from_value(raw)?;
            if let Some(bar) = event.kline.into_bar() {
                return Ok(ParsedMessage::Kline(bar));
            }
        }
    }

    Ok(ParsedMessage::Unknown)
}
