//! Client Protocol
//!
//! Parses inbound client frames into requests.
//!
//! # Wire Format (JSON)
//! ```json
//! {"type": "subscribe", "symbol": "aapl"}
//! ```
//!
//! A message is a valid request when `type` is `"subscribe"` and `symbol` is
//! a non-blank string. Anything that is not JSON, or that carries a symbol of
//! the wrong type, cannot be processed at all.

use serde_json::Value;

use crate::domain::streaming::{INVALID_FORMAT_REPLY, PROCESSING_FAILED_REPLY, Symbol};

/// A valid client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Watch `symbol`, replacing any previous watch.
    Subscribe(Symbol),
}

/// Why a client frame was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame could not be processed (bad JSON, bad encoding, bad types).
    #[error("malformed client message: {0}")]
    Malformed(String),
    /// Well-formed JSON that is not a known request.
    #[error("unrecognized client message")]
    InvalidFormat,
}

impl ProtocolError {
    /// Text sent back to the client.
    #[must_use]
    pub const fn reply(&self) -> &'static str {
        match self {
            Self::Malformed(_) => PROCESSING_FAILED_REPLY,
            Self::InvalidFormat => INVALID_FORMAT_REPLY,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// Parse one text frame from a client.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] for frames that cannot be processed
/// and [`ProtocolError::InvalidFormat`] for JSON that is not a request.
pub fn parse_client_message(text: &str) -> Result<ClientRequest, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;

    let fields = match value {
        Value::Object(fields) => fields,
        Value::Null => return Err(ProtocolError::Malformed("null message".to_string())),
        _ => return Err(ProtocolError::InvalidFormat),
    };

    if fields.get("type").and_then(Value::as_str) != Some("subscribe") {
        return Err(ProtocolError::InvalidFormat);
    }

    match fields.get("symbol") {
        Some(Value::String(raw)) => Symbol::normalize(raw)
            .map(ClientRequest::Subscribe)
            .ok_or(ProtocolError::InvalidFormat),
        Some(other) if is_truthy(other) => Err(ProtocolError::Malformed(format!(
            "symbol must be a string, got {other}"
        ))),
        _ => Err(ProtocolError::InvalidFormat),
    }
}

/// Parse one binary frame from a client.
///
/// UTF-8 payloads are treated as text.
///
/// # Errors
///
/// Same as [`parse_client_message`], plus [`ProtocolError::Malformed`] for
/// non-UTF-8 payloads.
pub fn parse_client_binary(data: &[u8]) -> Result<ClientRequest, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    parse_client_message(text)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn subscribe(raw: &str) -> ClientRequest {
        ClientRequest::Subscribe(Symbol::normalize(raw).unwrap())
    }

    #[test_case(r#"{"type":"subscribe","symbol":"aapl"}"#, "AAPL" ; "lowercase symbol")]
    #[test_case(r#"{"type":"subscribe","symbol":"MSFT"}"#, "MSFT" ; "uppercase symbol")]
    #[test_case(r#"{"symbol":"tsla","type":"subscribe","extra":1}"#, "TSLA" ; "extra fields ignored")]
    fn valid_subscribe(text: &str, expected: &str) {
        assert_eq!(parse_client_message(text).unwrap(), subscribe(expected));
    }

    #[test_case(r#"{"type":"unsubscribe","symbol":"AAPL"}"# ; "unknown type")]
    #[test_case(r#"{"type":"subscribe"}"# ; "missing symbol")]
    #[test_case(r#"{"type":"subscribe","symbol":""}"# ; "empty symbol")]
    #[test_case(r#"{"type":"subscribe","symbol":"   "}"# ; "blank symbol")]
    #[test_case(r#"{"type":"subscribe","symbol":null}"# ; "null symbol")]
    #[test_case(r#"{"type":"subscribe","symbol":0}"# ; "zero symbol")]
    #[test_case(r#"{"type":"subscribe","symbol":false}"# ; "false symbol")]
    #[test_case(r#"{"symbol":"AAPL"}"# ; "missing type")]
    #[test_case("[1,2]" ; "array message")]
    #[test_case("42" ; "number message")]
    fn invalid_format(text: &str) {
        let err = parse_client_message(text).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidFormat));
        assert_eq!(err.reply(), "Invalid message format.");
    }

    #[test_case("not json" ; "not json")]
    #[test_case(r#"{"type":"subscribe""# ; "truncated")]
    #[test_case("null" ; "null message")]
    #[test_case(r#"{"type":"subscribe","symbol":123}"# ; "numeric symbol")]
    #[test_case(r#"{"type":"subscribe","symbol":true}"# ; "boolean symbol")]
    #[test_case(r#"{"type":"subscribe","symbol":["AAPL"]}"# ; "array symbol")]
    fn malformed(text: &str) {
        let err = parse_client_message(text).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert_eq!(err.reply(), "Failed to process message.");
    }

    #[test]
    fn binary_utf8_is_text() {
        let request = parse_client_binary(br#"{"type":"subscribe","symbol":"nvda"}"#).unwrap();
        assert_eq!(request, subscribe("NVDA"));
    }

    #[test]
    fn binary_non_utf8_is_malformed() {
        let err = parse_client_binary(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }
}
