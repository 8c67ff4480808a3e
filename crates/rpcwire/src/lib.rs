//! # RpcWire
//!
//! The JSON-RPC 2.0 wire layer: envelopes, the fixed error table, and the
//! parameter codecs that map JSON parameter shapes to ordered value slots.
//!
//! ## Architecture
//!
//! This crate performs no I/O and owns no state. It turns one transport
//! message into classified [`Item`]s, shapes replies back into bytes, and
//! converts between `params`/`result` fragments and `Vec<Value>` slots.
//! Correlation, dispatch and scheduling live in `rpclink`.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::Mixed;
pub use codec::Named;
pub use codec::Original;
pub use codec::ParamsCodec;
pub use codec::Positional;
pub use error::CodecError;
pub use error::ErrorCode;
pub use error::ErrorInfo;
pub use message::encode_replies;
pub use message::parse_message;
pub use message::Envelope;
pub use message::Inbound;
pub use message::Item;
pub use message::Outcome;
pub use message::VERSION;
