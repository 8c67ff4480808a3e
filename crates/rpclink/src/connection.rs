//! # Connection with Async Read Loop
//!
//! A `Connection` is both a JSON-RPC server and client over one transport.
//! A single read loop pulls messages off the transport, resolves responses
//! on the spot and hands requests and notifications to their own task, so a
//! slow handler never holds up the next message. Outbound calls are
//! correlated with their responses through sequence numbers.
//!
//! ## Invariants
//!
//! - **Sequential Reads**: Only the serve loop reads, one message at a time.
//! - **Reader Never Waits on Handlers**: The in-flight bound gates dispatch
//!   tasks only. Reading and response correlation continue while every slot
//!   is taken.
//! - **Serialized Writes**: Every physical write happens under one lock.
//! - **At Most One Resolution**: A pending call is removed from the table by
//!   whichever path resolves it first: its response, its timeout, a failed
//!   write, or teardown.
//! - **No Leaked Callers**: When the read loop ends, every pending call is
//!   resolved with `InternalError` and later calls fail with `Error::Closed`.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rpcwire::CodecError;
use rpcwire::Envelope;
use rpcwire::ErrorInfo;
use rpcwire::Item;
use rpcwire::Outcome;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;
use tracing::Instrument;

use crate::builder::ConnectionBuilder;
use crate::config::ConnectionConfig;
use crate::registry;
use crate::registry::Registry;
use crate::session::Session;
use crate::transport;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The transport failed to write, or ended the serve loop.
    Transport(transport::Error),
    /// A value could not be converted to or from JSON.
    Json(String),
    /// Params or results did not fit the codec.
    Codec(CodecError),
    /// The peer answered with an error, or the connection closed mid-call.
    Rpc(ErrorInfo),
    /// No response arrived within the configured timeout.
    Timeout,
    /// The connection is no longer open.
    Closed,
    /// `serve` was called while another serve loop is running.
    AlreadyServing,
    /// The pending entry vanished without a response.
    ChannelClosed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Json(msg) => write!(f, "JSON error: {}", msg),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::Rpc(info) => write!(f, "RPC error [{}]: {}", info.code, info.message),
            Self::Timeout => write!(f, "RPC call timed out"),
            Self::Closed => write!(f, "Connection closed"),
            Self::AlreadyServing => write!(f, "Connection is already being served"),
            Self::ChannelClosed => write!(f, "Response channel closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<ErrorInfo> for Error {
    fn from(e: ErrorInfo) -> Self {
        Self::Rpc(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle of a connection. There is no way back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl State {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => State::Open,
            1 => State::Closing,
            _ => State::Closed,
        }
    }
}

/// A JSON-RPC peer bound to one transport.
///
/// Cloning is cheap and yields another handle to the same connection; this is
/// what handlers receive so they can reach the session or issue nested calls.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    transport: Box<dyn Transport>,
    registry: Arc<Registry>,
    pending: DashMap<u64, oneshot::Sender<Outcome>>,
    seq_gen: AtomicU64,
    state: AtomicU8,
    serving: AtomicBool,
    write_lock: Mutex<()>,
    in_flight: Option<Arc<Semaphore>>,
    session: Session,
}

impl Inner {
    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl Connection {
    /// Binds `registry` to `transport` with the default configuration.
    pub fn new(transport: impl Transport, registry: Arc<Registry>) -> Self {
        Self::with_config(Box::new(transport), registry, ConnectionConfig::default())
    }

    /// Starts a builder for a connection with custom settings.
    pub fn builder(transport: impl Transport) -> ConnectionBuilder {
        ConnectionBuilder::new(transport)
    }

    pub(crate) fn with_config(
        transport: Box<dyn Transport>,
        registry: Arc<Registry>,
        config: ConnectionConfig,
    ) -> Self {
        let in_flight = config.max_in_flight.map(|limit| Arc::new(Semaphore::new(limit)));

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                registry,
                pending: DashMap::new(),
                seq_gen: AtomicU64::new(1),
                state: AtomicU8::new(State::Open as u8),
                serving: AtomicBool::new(false),
                write_lock: Mutex::new(()),
                in_flight,
                session: Session::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn timeout(&self) -> Duration {
        self.inner.config.timeout
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Per-connection storage shared by every handler on this connection.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// Number of outbound calls still awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Reads and dispatches messages until the transport fails.
    ///
    /// Returns `Ok(())` when the transport reports an orderly close and the
    /// transport error otherwise. Either way the connection is `Closed`
    /// afterwards and every call that was still pending has been resolved.
    pub async fn serve(&self) -> Result<()> {
        if self.state() != State::Open {
            return Err(Error::Closed);
        }
        if self.inner.serving.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyServing);
        }

        let span = tracing::info_span!("serve", conn = %self.inner.config.name);
        let error = self.read_loop().instrument(span.clone()).await;
        span.in_scope(|| self.teardown());

        match error {
            transport::Error::Closed => Ok(()),
            e => Err(Error::Transport(e)),
        }
    }

    /// Runs [`Connection::serve`] on a new task.
    pub fn spawn_serve(&self) -> JoinHandle<Result<()>> {
        let conn = self.clone();
        tokio::spawn(async move { conn.serve().await })
    }

    async fn read_loop(&self) -> transport::Error {
        debug!("read loop started");

        loop {
            let message = match self.inner.transport.read_message().await {
                Ok(message) => message,
                Err(e) => {
                    debug!(error = %e, "read loop terminated");
                    return e;
                }
            };
            trace!(len = message.len(), "message received");

            self.route_message(message);
        }
    }

    /// Resolves responses on the reader and hands the rest to a new task.
    /// Only requests and notifications wait for an in-flight slot.
    fn route_message(&self, raw: Vec<u8>) {
        let inbound = match rpcwire::parse_message(&raw) {
            Ok(inbound) => inbound,
            Err(error) => {
                warn!(code = error.code, "rejecting message: {}", error);
                let conn = self.clone();
                tokio::spawn(
                    async move {
                        let reply = [Envelope::failure(Value::Null, error)];
                        conn.write_replies(&reply, false).await;
                    }
                    .in_current_span(),
                );
                return;
            }
        };

        let mut work = Vec::with_capacity(inbound.items.len());
        let mut dispatch = false;
        for item in inbound.items {
            match item {
                Item::Response { id, outcome } => self.process_response(id, outcome),
                Item::Request { .. } | Item::Notification { .. } => {
                    dispatch = true;
                    work.push(item);
                }
                item => work.push(item),
            }
        }
        if work.is_empty() {
            return;
        }

        let conn = self.clone();
        let batch = inbound.batch;
        tokio::spawn(
            async move {
                let _permit = if dispatch { conn.acquire_slot().await } else { None };
                conn.process_items(work, batch).await;
            }
            .in_current_span(),
        );
    }

    /// Waits for an in-flight slot when the connection is bounded.
    async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        let limit = self.inner.in_flight.as_ref()?;
        Arc::clone(limit).acquire_owned().await.ok()
    }

    /// Resolves every pending call with `InternalError` and closes the connection.
    fn teardown(&self) {
        self.inner.set_state(State::Closing);

        let keys: Vec<u64> = self.inner.pending.iter().map(|e| *e.key()).collect();
        let mut resolved = 0usize;
        for key in keys {
            if let Some((_, tx)) = self.inner.pending.remove(&key) {
                if tx.send(Err(ErrorInfo::internal_error())).is_ok() {
                    resolved += 1;
                }
            }
        }

        self.inner.set_state(State::Closed);
        debug!(resolved, "connection closed");
    }

    /// Calls `method` on the peer and waits for its raw result.
    pub async fn call_raw(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let (seq, rx) = self.prepare_call()?;

        debug!(seq, method, "sending request");
        let request = Envelope::request(Value::from(seq), method, params);
        if let Err(e) = self.write_envelope(&request).await {
            self.inner.pending.remove(&seq);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.config.timeout, rx).await {
            Ok(Ok(outcome)) => outcome.map_err(Error::Rpc),
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                self.inner.pending.remove(&seq);
                debug!(seq, method, "call timed out");
                Err(Error::Timeout)
            }
        }
    }

    /// Sends `method` to the peer without expecting a reply.
    pub async fn notify_raw(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.state() != State::Open {
            return Err(Error::Closed);
        }

        debug!(method, "sending notification");
        self.write_envelope(&Envelope::notification(method, params)).await
    }

    /// Allocates a sequence number and registers its pending entry.
    fn prepare_call(&self) -> Result<(u64, oneshot::Receiver<Outcome>)> {
        let seq = self.inner.seq_gen.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(seq, tx);

        // teardown marks the state before draining, so an entry that slipped
        // in after the drain is seen here and removed by its owner
        if self.state() != State::Open {
            self.inner.pending.remove(&seq);
            return Err(Error::Closed);
        }

        Ok((seq, rx))
    }

    async fn write_envelope(&self, envelope: &Envelope) -> Result<()> {
        let bytes = envelope.to_bytes()?;
        self.write_bytes(&bytes).await
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        trace!(len = bytes.len(), "writing message");
        self.inner.transport.write_message(bytes).await?;
        Ok(())
    }

    async fn process_items(&self, items: Vec<Item>, batch: bool) {
        let mut replies = Vec::new();
        for item in items {
            match item {
                Item::Request { id, method, params } => {
                    replies.push(self.process_request(id, method, params).await);
                }
                Item::Notification { method, params } => {
                    self.process_notification(method, params).await;
                }
                Item::Response { id, outcome } => self.process_response(id, outcome),
                Item::Invalid(error) => {
                    debug!(code = error.code, "invalid element: {}", error);
                    replies.push(Envelope::failure(Value::Null, error));
                }
                Item::Discarded { id, reason } => {
                    warn!(%id, reason, "discarding response");
                }
            }
        }

        self.write_replies(&replies, batch).await;
    }

    async fn write_replies(&self, replies: &[Envelope], batch: bool) {
        let bytes = match rpcwire::encode_replies(replies, batch) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to encode replies");
                return;
            }
        };

        if let Err(e) = self.write_bytes(&bytes).await {
            warn!(error = %e, "failed to write replies");
        }
    }

    async fn process_request(&self, id: Value, method: String, params: Value) -> Envelope {
        let Some(handler) = self.inner.registry.lookup(&method) else {
            debug!(%id, %method, "method not found");
            return Envelope::failure(id, ErrorInfo::method_not_found());
        };

        debug!(%id, %method, "dispatching request");
        match handler.handle(self.clone(), params).await {
            Ok(result) => Envelope::success(id, result),
            Err(err) => {
                let error = registry::to_error_info(err);
                debug!(%id, %method, code = error.code, "request failed: {}", error);
                Envelope::failure(id, error)
            }
        }
    }

    async fn process_notification(&self, method: String, params: Value) {
        let Some(handler) = self.inner.registry.lookup(&method) else {
            debug!(%method, "dropping notification for unknown method");
            return;
        };

        debug!(%method, "dispatching notification");
        if let Err(err) = handler.handle(self.clone(), params).await {
            debug!(%method, "notification failed: {:#}", err);
        }
    }

    fn process_response(&self, id: Value, outcome: Outcome) {
        let Some(seq) = id.as_u64() else {
            debug!(%id, "dropping response with foreign id");
            return;
        };

        match self.inner.pending.remove(&seq) {
            Some((_, tx)) => {
                if tx.send(outcome).is_err() {
                    debug!(seq, "caller stopped waiting");
                }
            }
            None => debug!(seq, "dropping response for unknown call"),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.config.name)
            .field("state", &self.state())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}
