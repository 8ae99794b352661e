//! Tick Codec
//!
//! Decodes inbound stream messages into ticks.
//!
//! Accepted shapes:
//!
//! ```json
//! {"e":"trade","E":1700000000123,"s":"BTCUSDT","p":"37012.50","T":1700000000120}
//! {"price": 101.25, "timestamp": 1700000000000}
//! {"type":"UPDATE","payload":{"value": 1250000.0}}
//! ```
//!
//! The first price field present wins (`p`, `price`, `value` by default);
//! numbers and numeric strings are accepted. The timestamp is read in
//! milliseconds from `T`, `E` or `timestamp`, falling back to receipt time.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::feed::Tick;

/// Default price field names, in priority order.
pub const DEFAULT_PRICE_FIELDS: &[&str] = &["p", "price", "value"];

/// Default timestamp field names (epoch milliseconds), in priority order.
pub const DEFAULT_TIMESTAMP_FIELDS: &[&str] = &["T", "E", "timestamp"];

/// Envelope type carrying portfolio updates.
const ENVELOPE_TYPE: &str = "UPDATE";

/// Codec errors. Every variant marks the message as malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(String),
    /// JSON, but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// `UPDATE` envelope without an object payload.
    #[error("update envelope has no object payload")]
    MissingPayload,
    /// None of the price fields is present.
    #[error("no price field ({0}) in message")]
    MissingPrice(String),
    /// Price field present but not numeric.
    #[error("price field {field} is not numeric: {raw}")]
    InvalidPrice {
        /// Field name.
        field: String,
        /// Raw JSON value.
        raw: String,
    },
    /// Price is NaN or infinite.
    #[error("price field {0} is not finite")]
    NonFinite(String),
}

/// JSON tick decoder.
#[derive(Debug, Clone)]
pub struct TickCodec {
    price_fields: Vec<String>,
    timestamp_fields: Vec<String>,
}

impl Default for TickCodec {
    fn default() -> Self {
        Self::new(DEFAULT_PRICE_FIELDS.iter().map(ToString::to_string).collect())
    }
}

impl TickCodec {
    /// Create a codec reading the given price fields in order.
    #[must_use]
    pub fn new(price_fields: Vec<String>) -> Self {
        Self {
            price_fields,
            timestamp_fields: DEFAULT_TIMESTAMP_FIELDS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Price fields, in priority order.
    #[must_use]
    pub fn price_fields(&self) -> &[String] {
        &self.price_fields
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the frame is not a JSON object carrying a
    /// finite numeric price.
    pub fn decode(&self, text: &str) -> Result<Tick, CodecError> {
        let value: Value =
            serde_json::from_str(text.trim()).map_err(|e| CodecError::Json(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(CodecError::NotAnObject);
        };

        let body = match object.get("type") {
            Some(Value::String(kind)) if kind == ENVELOPE_TYPE => match object.get("payload") {
                Some(Value::Object(payload)) => payload,
                _ => return Err(CodecError::MissingPayload),
            },
            _ => &object,
        };

        let value = self.price(body)?;
        let timestamp = self.timestamp(body).unwrap_or_else(Utc::now);
        Ok(Tick::new(timestamp, value))
    }

    fn price(&self, body: &Map<String, Value>) -> Result<f64, CodecError> {
        let Some((field, raw)) = self
            .price_fields
            .iter()
            .find_map(|field| body.get(field).map(|raw| (field, raw)))
        else {
            return Err(CodecError::MissingPrice(self.price_fields.join(", ")));
        };

        let price = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| CodecError::InvalidPrice {
            field: field.clone(),
            raw: raw.to_string(),
        })?;

        if !price.is_finite() {
            return Err(CodecError::NonFinite(field.clone()));
        }
        Ok(price)
    }

    fn timestamp(&self, body: &Map<String, Value>) -> Option<DateTime<Utc>> {
        self.timestamp_fields
            .iter()
            .filter_map(|field| body.get(field))
            .find_map(|raw| raw.as_i64().and_then(DateTime::from_timestamp_millis))
    }
}
