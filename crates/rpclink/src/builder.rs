//! Fluent construction of a [`Connection`].
//!
//! ```ignore
//! let conn = Connection::builder(transport)
//!     .registry(registry)
//!     .name("editor")
//!     .timeout(Duration::from_secs(30))
//!     .build()?;
//! tokio::spawn(async move { conn.serve().await });
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::registry::Registry;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    InvalidConfig(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "Invalid connection config: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Builder for [`Connection`]. Without a registry the connection serves no
/// methods and answers every request with `MethodNotFound`.
pub struct ConnectionBuilder {
    transport: Box<dyn Transport>,
    registry: Option<Arc<Registry>>,
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Box::new(transport),
            registry: None,
            config: ConnectionConfig::default(),
        }
    }

    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.config.max_in_flight = Some(limit);
        self
    }

    /// Replaces every setting at once.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Connection> {
        if self.config.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must be non-zero".to_string()));
        }
        if self.config.max_in_flight == Some(0) {
            return Err(Error::InvalidConfig(
                "max_in_flight must be at least 1".to_string(),
            ));
        }

        let registry = self.registry.unwrap_or_default();
        Ok(Connection::with_config(self.transport, registry, self.config))
    }
}
