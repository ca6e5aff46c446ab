//! REST response shapes.

use model::{Bar, BarSource, Interval};
use serde::Deserialize;
use serde_json::Value;

use crate::error::RestError;

/// One funding-rate record from the funding history endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRate {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64_from_str")]
    pub funding_rate: f64,
    pub funding_time: i64,
}

fn de_f64_from_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// Parse one kline row from the exchange's array-of-arrays format:
/// `[open_time, "o", "h", "l", "c", "v", close_time, "quote_v", trades, ...]`.
/// REST bars are always closed.
pub fn parse_kline_row(row: &Value, interval: Interval) -> Result<Bar, RestError> {
    let arr = row
        .as_array()
        .ok_or_else(|| RestError::Parse("kline row is not an array".to_string()))?;
    if arr.len() < 9 {
        return Err(RestError::Parse(format!(
            "kline row too short: {} fields",
            arr.len()
        )));
    }

    let int_at = |i: usize| -> Result<i64, RestError> {
        arr[i]
            .as_i64()
            .ok_or_else(|| RestError::Parse(format!("field {} is not an integer", i)))
    };
    let num_at = |i: usize| -> Result<f64, RestError> {
        arr[i]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| RestError::Parse(format!("field {} is not a decimal string", i)))
    };

    Ok(Bar {
        interval,
        open_time: int_at(0)?,
        close_time: int_at(6)?,
        open: num_at(1)?,
        high: num_at(2)?,
        low: num_at(3)?,
        close: num_at(4)?,
        volume: num_at(5)?,
        trades: int_at(8)?,
        is_closed: true,
        source: BarSource::Rest,
    })
}
