//! # Method Registry
//!
//! Maps method names to low-level handlers that work on raw JSON.
//!
//! ## Lifecycle
//!
//! A `Registry` is filled in before any connection is built and then shared
//! as `Arc<Registry>`. Every dispatch task reads it concurrently, so once it
//! is behind the `Arc` it can no longer be mutated.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use rpcwire::ErrorInfo;
use serde_json::Value;

use crate::connection::Connection;

/// What a handler produces: a raw `result`, or an error to report.
pub type HandlerResult = anyhow::Result<Value>;

/// A low-level method: raw `params` in, raw `result` out.
///
/// `params` is `Value::Null` when the request carried none. Returning an
/// [`ErrorInfo`] (directly or through `anyhow`) forwards it to the peer as
/// is; any other error is reported as an application error.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, conn: Connection, params: Value) -> HandlerResult;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Connection, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, conn: Connection, params: Value) -> HandlerResult {
        (self)(conn, params).await
    }
}

/// Converts a handler failure into the error object sent on the wire.
pub fn to_error_info(err: anyhow::Error) -> ErrorInfo {
    match err.downcast::<ErrorInfo>() {
        Ok(info) => info,
        Err(other) => ErrorInfo::application(other.to_string()),
    }
}

#[derive(Default, Clone)]
pub struct Registry {
    methods: HashMap<String, Arc<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: impl Handler) -> &mut Self {
        self.insert(name, Some(Arc::new(handler)))
    }

    /// Registers a closure over raw params. Same as [`Registry::register`], but
    /// lets the compiler infer the closure's argument and error types.
    pub fn register_raw<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Connection, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(name, f)
    }

    /// Registers a shared handler. An absent handler leaves the registry untouched.
    pub fn insert(&mut self, name: impl Into<String>, handler: Option<Arc<dyn Handler>>) -> &mut Self {
        if let Some(handler) = handler {
            self.methods.insert(name.into(), handler);
        }
        self
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.methods.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("methods", &names).finish()
    }
}
