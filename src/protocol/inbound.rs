use serde::{Deserialize, Serialize};
use sonic_rs::JsonValueTrait;

use super::market::MarketChangeMessage;
use super::order::OrderChangeMessage;
use crate::core::{StreamError, StreamResult};

/// Sent once by the peer right after the transport comes up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMessage {
    #[serde(default)]
    pub id: Option<u32>,
    pub connection_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Success,
    Failure,
    #[serde(other)]
    Unknown,
}

/// Reply to a request, echoing its correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    #[serde(default)]
    pub id: Option<u32>,
    pub status_code: StatusCode,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub connection_closed: Option<bool>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub connections_available: Option<i64>,
}

impl StatusMessage {
    pub fn is_success(&self) -> bool {
        self.status_code == StatusCode::Success
    }

    pub fn is_connection_closed(&self) -> bool {
        self.connection_closed.unwrap_or(false)
    }

    /// Turn a failure status into [`StreamError::ServerError`].
    pub fn into_result(self) -> StreamResult<StatusMessage> {
        if self.is_success() {
            return Ok(self);
        }
        Err(StreamError::ServerError {
            code: self.error_code,
            message: self
                .error_message
                .unwrap_or_else(|| "status FAILURE without message".to_string()),
        })
    }
}

/// Decoded inbound frame, classified by its `op` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Connection(ConnectionMessage),
    Status(StatusMessage),
    MarketChange(MarketChangeMessage),
    OrderChange(OrderChangeMessage),
    Unknown { op: String },
}

impl InboundMessage {
    /// Decode one frame (without its delimiter).
    ///
    /// Only the `op` field is inspected before picking the target type, so unrecognised ops
    /// cost a single lazy lookup.
    pub fn decode(frame: &[u8]) -> StreamResult<Self> {
        let op = sonic_rs::get(frame, &["op"])
            .map_err(|err| StreamError::ParseFailed(format!("missing op: {err}")))?;
        let Some(op) = op.as_str() else {
            return Err(StreamError::ParseFailed("op is not a string".to_string()));
        };
        let decoded = match op {
            "connection" => InboundMessage::Connection(parse(frame)?),
            "status" => InboundMessage::Status(parse(frame)?),
            "mcm" => InboundMessage::MarketChange(parse(frame)?),
            "ocm" => InboundMessage::OrderChange(parse(frame)?),
            other => InboundMessage::Unknown {
                op: other.to_string(),
            },
        };
        Ok(decoded)
    }

    pub fn op(&self) -> &str {
        match self {
            InboundMessage::Connection(_) => "connection",
            InboundMessage::Status(_) => "status",
            InboundMessage::MarketChange(_) => "mcm",
            InboundMessage::OrderChange(_) => "ocm",
            InboundMessage::Unknown { op } => op,
        }
    }
}

fn parse<'de, T: Deserialize<'de>>(frame: &'de [u8]) -> StreamResult<T> {
    sonic_rs::from_slice(frame).map_err(|err| StreamError::ParseFailed(err.to_string()))
}
