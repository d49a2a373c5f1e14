//! Purpose: Decode Website Actions payloads (base64 → gzip → JSON) into stored entries.
//! Exports: `DecodeStage`, `DecodeError`, `Capture`, `RecordOutcome`, `decode_payload`,
//! `decode_payload_with_limit`, `format_value`, `record`, `DEFAULT_MAX_INFLATED_BYTES`.
//! Role: Pure decode step plus the single recording step used by the interceptor and CLI.
//! Invariants: `record` appends exactly one entry per call, success or failure.
//! Invariants: Decode failures are returned as data; nothing escapes `record`.
//! Invariants: Inflated output is capped; exceeding the cap is an inflate failure.
//! Notes: Base64 accepts what browser `atob` accepts (ASCII whitespace, optional padding).
//! Notes: Whole-number floats print as integers (`1.0` → `1`), matching browser `JSON.stringify`.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use flate2::read::GzDecoder;
use serde_json::{Number, Value, json};
use std::fmt;
use std::io::Read;

use crate::core::store::RequestStore;

/// Inflated payload cap when none is configured. Real tracking payloads are a few KiB.
pub const DEFAULT_MAX_INFLATED_BYTES: u64 = 16 * 1024 * 1024;

// 2^53; beyond this an f64 no longer holds every integer exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

const ATOB: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeStage {
    Base64,
    Inflate,
    Json,
}

impl DecodeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            DecodeStage::Base64 => "base64",
            DecodeStage::Inflate => "inflate",
            DecodeStage::Json => "json",
        }
    }
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodeError {
    pub stage: DecodeStage,
    pub message: String,
}

impl DecodeError {
    fn new(stage: DecodeStage, message: impl fmt::Display) -> Self {
        Self {
            stage,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} decode failed: {}", self.stage, self.message)
    }
}

impl std::error::Error for DecodeError {}

/// What `record` stored: the assigned id, its timestamp, and the failure if any.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordOutcome {
    pub id: u64,
    pub timestamp: String,
    pub error: Option<DecodeError>,
}

impl RecordOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub fn decode_payload(payload: &str) -> Result<Value, DecodeError> {
    decode_payload_with_limit(payload, DEFAULT_MAX_INFLATED_BYTES)
}

/// Runs base64 → gzip → JSON, refusing to inflate more than `max_inflated_bytes`.
pub fn decode_payload_with_limit(
    payload: &str,
    max_inflated_bytes: u64,
) -> Result<Value, DecodeError> {
    let compact: Vec<u8> = payload
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let compressed = ATOB
        .decode(&compact)
        .map_err(|err| DecodeError::new(DecodeStage::Base64, err))?;

    let mut inflated = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .take(max_inflated_bytes.saturating_add(1))
        .read_to_end(&mut inflated)
        .map_err(|err| DecodeError::new(DecodeStage::Inflate, err))?;
    if inflated.len() as u64 > max_inflated_bytes {
        return Err(DecodeError::new(
            DecodeStage::Inflate,
            format!("inflated payload exceeds {max_inflated_bytes} bytes"),
        ));
    }
    let text = String::from_utf8(inflated)
        .map_err(|err| DecodeError::new(DecodeStage::Inflate, err))?;

    let mut value: Value =
        serde_json::from_str(&text).map_err(|err| DecodeError::new(DecodeStage::Json, err))?;
    integral_numbers(&mut value);
    Ok(value)
}

/// Two-space pretty JSON, the display form of a decoded payload.
pub fn format_value(value: &Value) -> String {
    let mut value = value.clone();
    integral_numbers(&mut value);
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

fn integral_numbers(value: &mut Value) {
    match value {
        Value::Number(number) if number.is_f64() => {
            if let Some(whole) = number.as_f64().and_then(exact_integer) {
                *number = whole;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(integral_numbers),
        Value::Object(map) => map.values_mut().for_each(integral_numbers),
        _ => {}
    }
}

fn exact_integer(float: f64) -> Option<Number> {
    if float.fract() != 0.0 || float.abs() > MAX_EXACT_INTEGER {
        return None;
    }
    if float < 0.0 {
        Some(Number::from(float as i64))
    } else {
        Some(Number::from(float as u64))
    }
}

/// One payload run through the pipeline and shaped into entry text, not yet stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Capture {
    pub formatted: String,
    pub raw: Value,
    pub error: Option<DecodeError>,
}

impl Capture {
    pub fn from_payload(payload: &str, max_inflated_bytes: u64) -> Self {
        match decode_payload_with_limit(payload, max_inflated_bytes) {
            Ok(value) => Self {
                formatted: format_value(&value),
                raw: value,
                error: None,
            },
            Err(err) => {
                let message = err.to_string();
                Self {
                    formatted: format!("Error decoding data: {message}\n\nRaw data: {payload}"),
                    raw: json!({ "error": message, "rawData": payload }),
                    error: Some(err),
                }
            }
        }
    }

    /// Assigns the next id and appends; the only step that needs the store.
    pub fn append_to(self, store: &mut RequestStore, timestamp: String) -> RecordOutcome {
        let id = store.append(timestamp.clone(), self.formatted, self.raw).id;
        RecordOutcome {
            id,
            timestamp,
            error: self.error,
        }
    }
}

pub fn record(store: &mut RequestStore, payload: &str, timestamp: String) -> RecordOutcome {
    Capture::from_payload(payload, DEFAULT_MAX_INFLATED_BYTES).append_to(store, timestamp)
}
