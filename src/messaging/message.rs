//! # Message Envelope
//!
//! Wire-format-agnostic envelope: a [`MessageHeader`] carried as broker
//! metadata plus a typed JSON payload carried as the message body. Header
//! parsing never depends on the payload type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};
use crate::constants::headers;

/// Correlation metadata present on every message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// Opaque credential forwarded untouched between services
    pub token: String,
    /// Correlation ID propagated through every hop of a run
    pub trace_id: String,
    /// Run this message belongs to
    pub run_id: i64,
}

impl MessageHeader {
    pub fn new(token: impl Into<String>, trace_id: impl Into<String>, run_id: i64) -> Self {
        Self {
            token: token.into(),
            trace_id: trace_id.into(),
            run_id,
        }
    }

    /// Header for a message that starts a new trace (API submissions, sweeps)
    pub fn with_new_trace(token: impl Into<String>, run_id: i64) -> Self {
        Self::new(token, Uuid::new_v4().to_string(), run_id)
    }

    /// Encode as named broker metadata
    pub fn to_properties(&self) -> HeaderProperties {
        let mut properties = HeaderProperties::default();
        properties.insert(headers::TOKEN, HeaderValue::Text(self.token.clone()));
        properties.insert(headers::TRACE_ID, HeaderValue::Text(self.trace_id.clone()));
        properties.insert(headers::RUN_ID, HeaderValue::Integer(self.run_id));
        properties
    }

    /// Decode from named broker metadata
    pub fn from_properties(properties: &HeaderProperties) -> MessagingResult<Self> {
        let token = properties.require_text(headers::TOKEN)?;
        let trace_id = properties.require_text(headers::TRACE_ID)?;
        let run_id = properties.require_integer(headers::RUN_ID)?;
        Ok(Self::new(token, trace_id, run_id))
    }
}

/// A single header attribute value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Integer(i64),
    Text(String),
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Broker-neutral header attributes as read from or written to a binding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderProperties(BTreeMap<String, HeaderValue>);

impl HeaderProperties {
    pub fn insert(&mut self, name: impl Into<String>, value: HeaderValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn require(&self, name: &str) -> MessagingResult<&HeaderValue> {
        self.get(name)
            .ok_or_else(|| MessagingError::invalid_header(name, "attribute is missing"))
    }

    fn require_text(&self, name: &str) -> MessagingResult<String> {
        match self.require(name)? {
            HeaderValue::Text(value) => Ok(value.clone()),
            HeaderValue::Integer(_) => Err(MessagingError::invalid_header(
                name,
                "expected a string value",
            )),
        }
    }

    /// Integers may arrive as text from brokers without typed attributes
    fn require_integer(&self, name: &str) -> MessagingResult<i64> {
        match self.require(name)? {
            HeaderValue::Integer(value) => Ok(*value),
            HeaderValue::Text(value) => value.trim().parse().map_err(|_| {
                MessagingError::invalid_header(name, format!("expected an integer, got '{value}'"))
            }),
        }
    }
}

impl FromIterator<(String, HeaderValue)> for HeaderProperties {
    fn from_iter<I: IntoIterator<Item = (String, HeaderValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Typed message: header plus payload
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    pub header: MessageHeader,
    pub payload: T,
}

impl<T> Message<T> {
    pub fn new(header: MessageHeader, payload: T) -> Self {
        Self { header, payload }
    }

    pub fn run_id(&self) -> i64 {
        self.header.run_id
    }

    pub fn trace_id(&self) -> &str {
        &self.header.trace_id
    }
}

impl<T: Serialize> Message<T> {
    /// Encode the payload as the JSON body
    pub fn encode_body(&self) -> MessagingResult<Vec<u8>> {
        serde_json::to_vec(&self.payload)
            .map_err(|e| MessagingError::message_serialization(e.to_string()))
    }
}

impl<T: DeserializeOwned> Message<T> {
    /// Decode a received message; header and payload fail independently
    pub fn decode(properties: &HeaderProperties, body: &[u8]) -> MessagingResult<Self> {
        let header = MessageHeader::from_properties(properties)?;
        let payload = serde_json::from_slice(body)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))?;
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_properties_round_trip() {
        let header = MessageHeader::new("secret-token", "trace-1", 42);
        let properties = header.to_properties();

        assert_eq!(properties.len(), 3);
        assert_eq!(properties.get("runId"), Some(&HeaderValue::Integer(42)));
        assert_eq!(MessageHeader::from_properties(&properties).unwrap(), header);
    }

    #[test]
    fn test_run_id_accepts_numeric_text() {
        let properties: HeaderProperties = [
            ("token".to_string(), HeaderValue::Text(String::new())),
            ("traceId".to_string(), HeaderValue::Text("t".into())),
            ("runId".to_string(), HeaderValue::Text("17".into())),
        ]
        .into_iter()
        .collect();

        assert_eq!(MessageHeader::from_properties(&properties).unwrap().run_id, 17);
    }

    #[test]
    fn test_missing_or_malformed_header_attributes() {
        let mut properties = MessageHeader::new("t", "trace", 1).to_properties();
        properties.insert("runId", HeaderValue::Text("seventeen".into()));
        let err = MessageHeader::from_properties(&properties).unwrap_err();
        assert!(matches!(err, MessagingError::InvalidHeader { ref attribute, .. } if attribute == "runId"));

        let empty = HeaderProperties::default();
        let err = MessageHeader::from_properties(&empty).unwrap_err();
        assert!(err.is_poison());
    }

    #[test]
    fn test_header_decoded_independently_of_payload() {
        let properties = MessageHeader::new("t", "trace-9", 9).to_properties();

        let decoded = Message::<serde_json::Value>::decode(&properties, br#"{"a":1}"#).unwrap();
        assert_eq!(decoded.trace_id(), "trace-9");
        assert_eq!(decoded.payload, json!({"a": 1}));

        let err = Message::<serde_json::Value>::decode(&properties, b"not json").unwrap_err();
        assert!(matches!(err, MessagingError::MessageDeserialization { .. }));
    }

    #[test]
    fn test_properties_json_shape() {
        let properties = MessageHeader::new("tok", "trace", 5).to_properties();
        let value = serde_json::to_value(&properties).unwrap();
        assert_eq!(value, json!({"runId": 5, "token": "tok", "traceId": "trace"}));

        let parsed: HeaderProperties = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, properties);
    }

    #[test]
    fn test_new_trace_ids_are_unique() {
        let a = MessageHeader::with_new_trace("t", 1);
        let b = MessageHeader::with_new_trace("t", 1);
        assert_ne!(a.trace_id, b.trace_id);
    }
}
