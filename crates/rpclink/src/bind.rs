//! # Typed Binding
//!
//! Registers ordinary async functions as methods and turns remote methods
//! into typed proxies. Everything here is sugar over the raw primitives in
//! [`crate::registry`] and [`crate::connection`].
//!
//! ## Shapes
//!
//! - **Codec-directed**: arguments and results are tuples implementing
//!   [`Params`]. A pair of [`ParamsCodec`]s decides how the tuple slots map
//!   to the `params` and `result` fragments.
//! - **Explicit**: one `Deserialize` params value in, one `Serialize` result
//!   out, with serde doing all the mapping.
//!
//! ## Invariants
//!
//! - A codec that cannot serve a signature's arity is rejected when the
//!   method is registered or the proxy is built, never on the wire.
//! - Params that fail to decode are answered with `InvalidParams` and the
//!   function is never invoked.
//! - A slot that is missing or `null` decodes to the type's `Default`.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use rpcwire::CodecError;
use rpcwire::ErrorInfo;
use rpcwire::ParamsCodec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::connection;
use crate::connection::Connection;
use crate::registry::Handler;
use crate::registry::HandlerResult;
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A codec cannot carry the number of slots the signature has.
    Codec { method: String, source: CodecError },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec { method, source } => write!(f, "Cannot bind '{}': {}", method, source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec { source, .. } => Some(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A fixed-size group of values carried as ordered slots.
///
/// Implemented for tuples of up to eight elements. A single value is a
/// one-element tuple, `(T,)`; no values at all is `()`.
pub trait Params: Sized + Send + 'static {
    const ARITY: usize;

    fn into_values(self) -> std::result::Result<Vec<Value>, CodecError>;

    fn from_values(values: Vec<Value>) -> std::result::Result<Self, CodecError>;
}

fn to_slot<T: Serialize>(slot: usize, value: &T) -> std::result::Result<Value, CodecError> {
    serde_json::to_value(value).map_err(|e| CodecError::Value {
        slot,
        message: e.to_string(),
    })
}

fn from_slot<T>(slot: usize, value: Option<Value>) -> std::result::Result<T, CodecError>
where
    T: DeserializeOwned + Default,
{
    match value {
        // Option<T> and friends have their own reading of null
        None | Some(Value::Null) => Ok(serde_json::from_value(Value::Null).unwrap_or_default()),
        Some(value) => serde_json::from_value(value).map_err(|e| CodecError::Value {
            slot,
            message: e.to_string(),
        }),
    }
}

macro_rules! impl_params {
    ($arity:expr; $($name:ident $slot:tt),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<$($name),*> Params for ($($name,)*)
        where
            $($name: Serialize + DeserializeOwned + Default + Send + 'static),*
        {
            const ARITY: usize = $arity;

            fn into_values(self) -> std::result::Result<Vec<Value>, CodecError> {
                let mut values = Vec::with_capacity($arity);
                $(values.push(to_slot($slot, &self.$slot)?);)*
                Ok(values)
            }

            fn from_values(values: Vec<Value>) -> std::result::Result<Self, CodecError> {
                let mut values = values.into_iter();
                Ok(($(from_slot::<$name>($slot, values.next())?,)*))
            }
        }
    };
}

impl_params!(0;);
impl_params!(1; A 0);
impl_params!(2; A 0, B 1);
impl_params!(3; A 0, B 1, C 2);
impl_params!(4; A 0, B 1, C 2, D 3);
impl_params!(5; A 0, B 1, C 2, D 3, E 4);
impl_params!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_params!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_params!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

fn check_arity(method: &str, codec: &dyn ParamsCodec, arity: usize) -> Result<()> {
    codec.check_arity(arity).map_err(|source| Error::Codec {
        method: method.to_string(),
        source,
    })
}

/// A null fragment is sent as absent `params`.
fn params_field(params: Value) -> Option<Value> {
    match params {
        Value::Null => None,
        params => Some(params),
    }
}

fn invalid_params(err: CodecError) -> anyhow::Error {
    ErrorInfo::invalid_params()
        .with_data(Value::String(err.to_string()))
        .into()
}

fn internal_error(err: impl std::fmt::Display) -> anyhow::Error {
    ErrorInfo::internal_error()
        .with_data(Value::String(err.to_string()))
        .into()
}

struct TypedHandler<F, Args, Out, I, O> {
    f: F,
    in_codec: I,
    out_codec: O,
    _marker: PhantomData<fn(Args) -> Out>,
}

#[async_trait::async_trait]
impl<F, Fut, Args, Out, I, O> Handler for TypedHandler<F, Args, Out, I, O>
where
    F: Fn(Connection, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
    Args: Params,
    Out: Params,
    I: ParamsCodec + 'static,
    O: ParamsCodec + 'static,
{
    async fn handle(&self, conn: Connection, params: Value) -> HandlerResult {
        let args = self
            .in_codec
            .decode(&params, Args::ARITY)
            .and_then(Args::from_values)
            .map_err(invalid_params)?;

        let out = (self.f)(conn, args).await?;

        let values = out.into_values().map_err(internal_error)?;
        self.out_codec.encode(values).map_err(internal_error)
    }
}

/// Absent params fall back to an empty object when `P` cannot be read from
/// null, so a struct whose fields are all optional or `#[serde(default)]`
/// still decodes.
fn decode_explicit<P>(params: Value) -> serde_json::Result<P>
where
    P: DeserializeOwned,
{
    match params {
        Value::Null => serde_json::from_value(Value::Null)
            .or_else(|_| serde_json::from_value(Value::Object(Map::new()))),
        params => serde_json::from_value(params),
    }
}

struct ExplicitHandler<F, P, R> {
    f: F,
    _marker: PhantomData<fn(P) -> R>,
}

#[async_trait::async_trait]
impl<F, Fut, P, R> Handler for ExplicitHandler<F, P, R>
where
    F: Fn(Connection, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn handle(&self, conn: Connection, params: Value) -> HandlerResult {
        let params: P = decode_explicit(params).map_err(|e| {
            anyhow::Error::from(
                ErrorInfo::invalid_params().with_data(Value::String(e.to_string())),
            )
        })?;

        let reply = (self.f)(conn, params).await?;
        serde_json::to_value(reply).map_err(internal_error)
    }
}

impl Registry {
    /// Registers `f` with its arguments decoded by `in_codec` and its results
    /// encoded by `out_codec`.
    ///
    /// ```ignore
    /// registry.register_fn(
    ///     "add",
    ///     |(a, b): (i64, i64)| async move { Ok((a + b,)) },
    ///     Named::new(["a", "b"]),
    ///     Original,
    /// )?;
    /// ```
    pub fn register_fn<Args, Out, F, Fut>(
        &mut self,
        name: impl Into<String>,
        f: F,
        in_codec: impl ParamsCodec + 'static,
        out_codec: impl ParamsCodec + 'static,
    ) -> Result<&mut Self>
    where
        Args: Params,
        Out: Params,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
    {
        self.register_fn_with_conn::<Args, Out, _, Fut>(
            name,
            move |_conn: Connection, args: Args| f(args),
            in_codec,
            out_codec,
        )
    }

    /// Like [`Registry::register_fn`], but `f` also receives the connection
    /// the request arrived on.
    pub fn register_fn_with_conn<Args, Out, F, Fut>(
        &mut self,
        name: impl Into<String>,
        f: F,
        in_codec: impl ParamsCodec + 'static,
        out_codec: impl ParamsCodec + 'static,
    ) -> Result<&mut Self>
    where
        Args: Params,
        Out: Params,
        F: Fn(Connection, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
    {
        let name = name.into();
        check_arity(&name, &in_codec, Args::ARITY)?;
        check_arity(&name, &out_codec, Out::ARITY)?;

        let handler = TypedHandler {
            f,
            in_codec,
            out_codec,
            _marker: PhantomData,
        };
        Ok(self.register(name, handler))
    }

    /// Registers `f` over one serde params value and one serde result.
    ///
    /// Missing fields are filled by serde alone: absent or `null` params are
    /// read as `{}` when `P` does not accept null, so required fields without
    /// `#[serde(default)]` are answered with `InvalidParams`.
    pub fn register_explicit<P, R, F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Connection, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.register(
            name,
            ExplicitHandler {
                f,
                _marker: PhantomData,
            },
        )
    }
}

impl Connection {
    /// Calls `method` with serde-shaped params and decodes the result.
    pub async fn call_explicit<P, R>(&self, method: &str, params: &P) -> connection::Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let raw = self.call_raw(method, params_field(params)).await?;
        Ok(serde_json::from_value(raw)?)
    }

    /// Sends `method` with serde-shaped params as a notification.
    pub async fn notify_explicit<P>(&self, method: &str, params: &P) -> connection::Result<()>
    where
        P: Serialize + ?Sized,
    {
        let params = serde_json::to_value(params)?;
        self.notify_raw(method, params_field(params)).await
    }

    /// Builds a typed caller for the remote `method`.
    pub fn proxy<Args, Out>(
        &self,
        method: impl Into<String>,
        in_codec: impl ParamsCodec + 'static,
        out_codec: impl ParamsCodec + 'static,
    ) -> Result<CallProxy<Args, Out>>
    where
        Args: Params,
        Out: Params,
    {
        let method = method.into();
        check_arity(&method, &in_codec, Args::ARITY)?;
        check_arity(&method, &out_codec, Out::ARITY)?;

        Ok(CallProxy {
            conn: self.clone(),
            method,
            in_codec: Arc::new(in_codec),
            out_codec: Arc::new(out_codec),
            _marker: PhantomData,
        })
    }

    /// Builds a typed notifier for the remote `method`.
    pub fn notifier<Args>(
        &self,
        method: impl Into<String>,
        codec: impl ParamsCodec + 'static,
    ) -> Result<NotifyProxy<Args>>
    where
        Args: Params,
    {
        let method = method.into();
        check_arity(&method, &codec, Args::ARITY)?;

        Ok(NotifyProxy {
            conn: self.clone(),
            method,
            codec: Arc::new(codec),
            _marker: PhantomData,
        })
    }
}

/// A typed handle to one remote method.
pub struct CallProxy<Args, Out> {
    conn: Connection,
    method: String,
    in_codec: Arc<dyn ParamsCodec>,
    out_codec: Arc<dyn ParamsCodec>,
    _marker: PhantomData<fn(Args) -> Out>,
}

impl<Args, Out> CallProxy<Args, Out>
where
    Args: Params,
    Out: Params,
{
    pub fn method(&self) -> &str {
        &self.method
    }

    pub async fn call(&self, args: Args) -> connection::Result<Out> {
        let params = self.in_codec.encode(args.into_values()?)?;
        let raw = self.conn.call_raw(&self.method, params_field(params)).await?;
        let slots = self.out_codec.decode(&raw, Out::ARITY)?;
        Ok(Out::from_values(slots)?)
    }
}

impl<Args, Out> Clone for CallProxy<Args, Out> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            method: self.method.clone(),
            in_codec: Arc::clone(&self.in_codec),
            out_codec: Arc::clone(&self.out_codec),
            _marker: PhantomData,
        }
    }
}

/// A typed handle for sending one notification method.
pub struct NotifyProxy<Args> {
    conn: Connection,
    method: String,
    codec: Arc<dyn ParamsCodec>,
    _marker: PhantomData<fn(Args)>,
}

impl<Args> NotifyProxy<Args>
where
    Args: Params,
{
    pub fn method(&self) -> &str {
        &self.method
    }

    pub async fn notify(&self, args: Args) -> connection::Result<()> {
        let params = self.codec.encode(args.into_values()?)?;
        self.conn.notify_raw(&self.method, params_field(params)).await
    }
}

impl<Args> Clone for NotifyProxy<Args> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            method: self.method.clone(),
            codec: Arc::clone(&self.codec),
            _marker: PhantomData,
        }
    }
}
