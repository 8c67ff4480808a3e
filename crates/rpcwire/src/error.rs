//! # Error Definitions
//!
//! The fixed JSON-RPC error table, the `ErrorInfo` object carried on the
//! wire, and the failures raised by the parameter codecs.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Pre-defined JSON-RPC error codes.
///
/// `ApplicationError` is reserved for handler failures that are not already
/// shaped as an [`ErrorInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
    ApplicationError = -32000,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ApplicationError => "Application error",
        }
    }

    /// Maps a raw code back onto the table, if it is one of ours.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            -32000 => Some(ErrorCode::ApplicationError),
            _ => None,
        }
    }
}

/// JSON-RPC error object.
///
/// Implements `std::error::Error` so handlers can return it through
/// `anyhow::Error` and have it forwarded to the peer verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorInfo {
    /// Creates the canonical error for a table entry.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
            data: None,
        }
    }

    /// Creates an error with an arbitrary code and message.
    pub fn custom(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Wraps an arbitrary failure as an `ApplicationError`.
    pub fn application(message: impl Into<String>) -> Self {
        Self::custom(ErrorCode::ApplicationError.code(), message)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(ErrorCode::ParseError)
    }

    pub fn invalid_request() -> Self {
        Self::new(ErrorCode::InvalidRequest)
    }

    pub fn method_not_found() -> Self {
        Self::new(ErrorCode::MethodNotFound)
    }

    pub fn invalid_params() -> Self {
        Self::new(ErrorCode::InvalidParams)
    }

    pub fn internal_error() -> Self {
        Self::new(ErrorCode::InternalError)
    }

    /// The table entry for this code, if any.
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorInfo {}

/// Failures while mapping value slots to and from a params fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The number of values does not match what the codec was built for.
    ArityMismatch { expected: usize, found: usize },
    /// The codec cannot represent this many slots at all.
    UnsupportedArity { codec: &'static str, arity: usize },
    /// The fragment has a JSON shape the codec does not accept.
    UnexpectedShape { codec: &'static str, expected: &'static str },
    /// More positional values than slots, with excess disallowed.
    TooManyArguments { expected: usize, found: usize },
    /// A named value without a matching slot, with excess disallowed.
    UnknownName(String),
    /// A slot value could not be converted to or from its Rust type.
    Value { slot: usize, message: String },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArityMismatch { expected, found } => {
                write!(f, "expected {} params, found {}", expected, found)
            }
            Self::UnsupportedArity { codec, arity } => {
                write!(f, "{} codec cannot handle {} params", codec, arity)
            }
            Self::UnexpectedShape { codec, expected } => {
                write!(f, "{} codec can only handle {}", codec, expected)
            }
            Self::TooManyArguments { expected, found } => {
                write!(f, "too many arguments: expected {}, found {}", expected, found)
            }
            Self::UnknownName(name) => write!(f, "too many arguments: unknown param '{}'", name),
            Self::Value { slot, message } => write!(f, "param {}: {}", slot, message),
        }
    }
}

impl std::error::Error for CodecError {}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
