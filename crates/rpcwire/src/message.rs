//! # Protocol Messages
//!
//! Defines the JSON-RPC envelope and the rules that classify an inbound
//! transport message into requests, notifications and responses.
//!
//! ## Invariants
//! - **Presence is not null**: `"id": null` and `"result": null` are present
//!   fields; only a missing key is `None`.
//! - **Panic Safety**: Classification never fails as a whole except for a
//!   parse error or an empty batch; bad elements become `Item::Invalid`.
//! - **Batch Mirroring**: a batch in produces a batch out, a single object in
//!   produces a single object out.

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

use crate::error::ErrorInfo;

/// The only protocol version spoken.
pub const VERSION: &str = "2.0";

/// The resolution of one call: a `result` or an `error`.
pub type Outcome = std::result::Result<Value, ErrorInfo>;

/// One JSON-RPC 2.0 message unit, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "version")]
    pub jsonrpc: String,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub id: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub params: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

fn version() -> String {
    VERSION.to_string()
}

/// Keeps an explicit `null` as `Some(Value::Null)`; a missing key falls back
/// to `#[serde(default)]`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    fn empty() -> Self {
        Self {
            jsonrpc: version(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    /// A request expecting a reply.
    pub fn request(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id),
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    /// A request without an id; never answered.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            ..Self::empty()
        }
    }

    pub fn failure(id: Value, error: ErrorInfo) -> Self {
        Self {
            id: Some(id),
            error: Some(error),
            ..Self::empty()
        }
    }

    /// Builds the reply for a request id from an outcome.
    pub fn reply(id: Value, outcome: Outcome) -> Self {
        match outcome {
            Ok(result) => Self::success(id, result),
            Err(error) => Self::failure(id, error),
        }
    }

    pub fn is_response(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    pub fn is_notification(&self) -> bool {
        !self.is_response() && self.method.is_some() && self.id.is_none()
    }

    /// Classifies this envelope.
    ///
    /// A present `result` or `error` makes it a response regardless of the
    /// other fields. Anything else must carry a `method`.
    pub fn classify(self) -> Item {
        let outcome = match (self.result, self.error) {
            (None, None) => None,
            (Some(result), None) => Some(Ok(result)),
            (None, Some(error)) => Some(Err(error)),
            (Some(_), Some(_)) => {
                return Item::Discarded {
                    id: self.id.unwrap_or(Value::Null),
                    reason: "response carries both result and error",
                };
            }
        };
        if let Some(outcome) = outcome {
            let id = self.id.unwrap_or(Value::Null);
            return Item::Response { id, outcome };
        }

        let Some(method) = self.method else {
            return Item::Invalid(ErrorInfo::invalid_request());
        };
        let params = self.params.unwrap_or(Value::Null);

        match self.id {
            Some(id) => Item::Request { id, method, params },
            None => Item::Notification { method, params },
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// One classified element of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Routed to the registry; exactly one reply echoing `id`.
    Request { id: Value, method: String, params: Value },
    /// Routed to the registry; never answered.
    Notification { method: String, params: Value },
    /// Routed to the pending-call table.
    Response { id: Value, outcome: Outcome },
    /// Answered with `{id: null, error}`.
    Invalid(ErrorInfo),
    /// Response-shaped but unusable; dropped without a reply.
    Discarded { id: Value, reason: &'static str },
}

/// A classified transport message.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Whether the message was a JSON array; replies mirror this.
    pub batch: bool,
    pub items: Vec<Item>,
}

/// Classifies one transport message.
///
/// Returns `Err` with the error to answer as `{id: null, error}` (never
/// batched) when the message cannot be processed at all: a parse failure
/// (`ParseError`) or an empty batch (`InvalidRequest`).
pub fn parse_message(raw: &[u8]) -> std::result::Result<Inbound, ErrorInfo> {
    let value: Value = serde_json::from_slice(raw).map_err(|_| ErrorInfo::parse_error())?;

    match value {
        Value::Array(elements) => {
            if elements.is_empty() {
                return Err(ErrorInfo::invalid_request());
            }
            let items = elements.into_iter().map(classify_value).collect();
            Ok(Inbound { batch: true, items })
        }
        single => Ok(Inbound {
            batch: false,
            items: vec![classify_value(single)],
        }),
    }
}

fn classify_value(value: Value) -> Item {
    // serde would happily read a struct out of a JSON array, so shape first
    if !value.is_object() {
        return Item::Invalid(ErrorInfo::invalid_request());
    }
    match serde_json::from_value::<Envelope>(value) {
        Ok(envelope) => envelope.classify(),
        Err(_) => Item::Invalid(ErrorInfo::invalid_request()),
    }
}

/// Shapes the replies produced for one inbound message.
///
/// Returns `None` when there is nothing to write back.
pub fn encode_replies(replies: &[Envelope], batch: bool) -> serde_json::Result<Option<Vec<u8>>> {
    match replies {
        [] => Ok(None),
        [single] if !batch => single.to_bytes().map(Some),
        _ if batch => serde_json::to_vec(replies).map(Some),
        // a single object never yields more than one reply
        [first, ..] => first.to_bytes().map(Some),
    }
}
