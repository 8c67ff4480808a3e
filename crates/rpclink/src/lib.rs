//! # RpcLink
//!
//! A JSON-RPC 2.0 peer over any duplex, message-oriented transport. One
//! [`Connection`] serves inbound requests and issues outbound calls over the
//! same transport at the same time.
//!
//! ## Layers
//!
//! - [`transport`]: the read-one / write-one capability the engine consumes.
//! - [`registry`]: method name to low-level handler.
//! - [`connection`]: read loop, concurrent dispatch, pending-call table.
//! - [`bind`]: typed register/call/notify on top of the raw primitives.

pub mod bind;
pub mod builder;
pub mod channel;
pub mod config;
pub mod connection;
pub mod registry;
pub mod session;
pub mod transport;

pub use bind::CallProxy;
pub use bind::NotifyProxy;
pub use bind::Params;
pub use builder::ConnectionBuilder;
pub use channel::ChannelTransport;
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use connection::State;
pub use registry::Handler;
pub use registry::HandlerResult;
pub use registry::Registry;
pub use session::Session;
pub use transport::Transport;

pub use rpcwire;
