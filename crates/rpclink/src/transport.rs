//! # Transport Abstraction
//!
//! A minimal, async interface for moving whole messages between peers.
//!
//! ## Philosophy
//!
//! - **Message-Oriented**: The Transport knows nothing about JSON-RPC. It
//!   moves opaque, already-framed messages and delivers them whole and in order.
//! - **Duplex**: Reads and writes are independent. The connection reads from
//!   exactly one task and serializes its own writes, so implementations need
//!   not guard against interleaved writers.
//! - **Fail When Closed**: Once the underlying link is gone, both operations
//!   must keep returning `Err`.

use std::sync::Arc;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The link was closed in an orderly way.
    Closed,
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Connection closed"),
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A duplex channel of whole messages.
///
/// This trait is designed to be object-safe (`Box<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Waits for the next inbound message.
    ///
    /// # invariants
    /// - Must return `Err` once the connection is closed, and keep doing so.
    /// - Should not interpret the payload content (e.g. no JSON parsing).
    async fn read_message(&self) -> Result<Vec<u8>>;

    /// Sends one message.
    ///
    /// # invariants
    /// - Must return `Err` once the connection is closed.
    /// - A message is either written whole or not at all.
    async fn write_message(&self, payload: &[u8]) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn read_message(&self) -> Result<Vec<u8>> {
        (**self).read_message().await
    }

    async fn write_message(&self, payload: &[u8]) -> Result<()> {
        (**self).write_message(payload).await
    }
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn read_message(&self) -> Result<Vec<u8>> {
        (**self).read_message().await
    }

    async fn write_message(&self, payload: &[u8]) -> Result<()> {
        (**self).write_message(payload).await
    }
}
