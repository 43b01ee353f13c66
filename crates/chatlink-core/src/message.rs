//! Chat wire envelope.
//!
//! Frames are UTF-8 JSON objects:
//! ```text
//! { "type": "text", "content": "hello", "timestamp": "2025-03-01T08:30:00.000Z" }
//! ```
//! Outbound frames carry only the three core fields. Inbound frames from the
//! assistant server may add message/session ids, sender, status, component
//! payloads and streaming markers; all of those are optional.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ChannelError;

/// The `type` field of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// A UI component payload (`componentType` + `componentData`).
    Component,
    /// Server-side notice.
    System,
    /// Any other type string, preserved verbatim.
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Component => "component",
            Self::System => "system",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" => Self::Text,
            "component" => Self::Component,
            "system" => Self::System,
            _ => Self::Other(s),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status the server attaches to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageStatus {
    Sending,
    Sent,
    Error,
    Other(String),
}

impl From<String> for MessageStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "sending" => Self::Sending,
            "sent" => Self::Sent,
            "error" => Self::Error,
            _ => Self::Other(s),
        }
    }
}

impl From<MessageStatus> for String {
    fn from(status: MessageStatus) -> Self {
        match status {
            MessageStatus::Sending => "sending".into(),
            MessageStatus::Sent => "sent".into(),
            MessageStatus::Error => "error".into(),
            MessageStatus::Other(s) => s,
        }
    }
}

/// A single chat message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// `"user"` or `"assistant"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    /// Component name when `kind` is [`MessageKind::Component`]
    /// (e.g. `"train_list"`, `"passenger_form"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_data: Option<Map<String, Value>>,
    /// Part of a streamed assistant reply.
    #[serde(default, alias = "isStreaming", skip_serializing_if = "is_false")]
    pub streaming: bool,
    /// Last chunk of a streamed reply.
    #[serde(default, skip_serializing_if = "is_false")]
    pub stream_end: bool,
}

impl ChatMessage {
    /// Build a message of the given kind stamped with the current time.
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: Utc::now(),
            message_id: None,
            session_id: None,
            sender: None,
            status: None,
            component_type: None,
            component_data: None,
            streaming: false,
            stream_end: false,
        }
    }

    /// Build an outbound text message stamped with the current time.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Text, content)
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ChannelError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame.
    pub fn decode(frame: &str) -> Result<Self, ChannelError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// `true` for the final chunk of a streamed reply, or any non-streamed message.
    pub fn is_complete(&self) -> bool {
        !self.streaming || self.stream_end
    }
}

/// Parse an ISO-8601 timestamp. Accepts RFC 3339 with an offset, or a naive
/// local date-time (interpreted as UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(_) => raw.parse::<NaiveDateTime>().map(|naive| naive.and_utc()),
    }
}

mod timestamp {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn is_false(b: &bool) -> bool {
    !*b
}
