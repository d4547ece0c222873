mod config;
mod stream;
mod conn;
mod pool;
mod metrics;

pub use self::config::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT_MILLIS, DEFAULT_MAX_INFLIGHT};
pub use self::stream::{Connect, KafkaConnector, KafkaStream, TlsConfig};
pub use self::conn::{Connecting, ConnectionState, KafkaConnection, SendRequest, TimedRequest};
pub use self::pool::{ConnectionPool, GetConnection, GetFirstAvailable};
pub use self::metrics::Metrics;

use bytes::{Bytes, BytesMut};

use futures::future::{self, Future, IntoFuture};
use futures::Poll;

use errors::{Error, ErrorKind, Result};
use protocol::{ApiKeys, ApiVersion, CorrelationId};

/// One Kafka API bound to a concrete version: the header flavor flags,
/// the payload encoder and the response decoder, as plain data the
/// connection can act on without knowing the API itself.
pub struct ApiDescriptor<T> {
    pub api_key: ApiKeys,
    pub api_version: ApiVersion,
    /// The request header ends with a tagged-field block.
    pub request_header_tagged: bool,
    /// The response header carries a tagged-field block to consume
    /// before the body. Kafka is inconsistent about this (ApiVersions
    /// responses never carry it), so it rides on the descriptor.
    pub response_header_tagged: bool,
    pub encode: Box<Fn(&mut BytesMut) -> Result<()>>,
    pub reply: Reply<T>,
}

/// How a request completes.
pub enum Reply<T> {
    /// Parse the correlated response body.
    Response(Box<Fn(&[u8]) -> Result<T>>),
    /// Fire and forget: no in-flight slot, completed as soon as the bytes
    /// are handed to the socket, mapping the "socket can accept more" flag.
    Sent(Box<Fn(bool) -> T>),
}

impl<T> ApiDescriptor<T> {
    pub fn new<E, P>(api_key: ApiKeys,
                     api_version: ApiVersion,
                     request_header_tagged: bool,
                     response_header_tagged: bool,
                     encode: E,
                     parse: P)
                     -> Self
        where E: Fn(&mut BytesMut) -> Result<()> + 'static,
              P: Fn(&[u8]) -> Result<T> + 'static
    {
        ApiDescriptor {
            api_key: api_key,
            api_version: api_version,
            request_header_tagged: request_header_tagged,
            response_header_tagged: response_header_tagged,
            encode: Box::new(encode),
            reply: Reply::Response(Box::new(parse)),
        }
    }

    pub fn fire_and_forget<E, S>(api_key: ApiKeys,
                                 api_version: ApiVersion,
                                 request_header_tagged: bool,
                                 encode: E,
                                 sent: S)
                                 -> Self
        where E: Fn(&mut BytesMut) -> Result<()> + 'static,
              S: Fn(bool) -> T + 'static
    {
        ApiDescriptor {
            api_key: api_key,
            api_version: api_version,
            request_header_tagged: request_header_tagged,
            response_header_tagged: false,
            encode: Box::new(encode),
            reply: Reply::Sent(Box::new(sent)),
        }
    }

    pub fn no_response(&self) -> bool {
        match self.reply {
            Reply::Sent(_) => true,
            Reply::Response(_) => false,
        }
    }
}

/// Lifecycle notifications a connection broadcasts to its subscribers.
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    Connected,
    /// The write side unblocked and the pending queue fully flushed.
    Drain,
    /// A well-framed response arrived without a matching in-flight
    /// request; the raw frame rides along and the socket stays up.
    UnexpectedCorrelation {
        correlation_id: CorrelationId,
        frame: Bytes,
    },
    SaslHandshake { mechanisms: Vec<String> },
    SaslAuthenticated,
    Error { reason: String },
    Closed,
}

/// Diagnostics seam. The connection reports request and lifecycle
/// milestones here; the default implementation drops everything.
pub trait Tracer {
    fn request_start(&self,
                     _api_key: ApiKeys,
                     _api_version: ApiVersion,
                     _correlation_id: CorrelationId) {
    }

    fn request_end(&self, _api_key: ApiKeys, _correlation_id: CorrelationId, _ok: bool) {}

    fn connection_event(&self, _event: &ConnectionEvent) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

pub struct StaticBoxFuture<T = (), E = Error>(Box<Future<Item = T, Error = E> + 'static>)
    where T: 'static,
          E: 'static;

impl<T, E> StaticBoxFuture<T, E> {
    pub fn new<F>(inner: F) -> Self
        where F: IntoFuture<Item = T, Error = E> + 'static,
              F::Future: 'static
    {
        StaticBoxFuture(Box::new(inner.into_future()))
    }

    pub fn ok(item: T) -> Self {
        StaticBoxFuture(Box::new(future::ok(item)))
    }

    pub fn err(err: E) -> Self {
        StaticBoxFuture(Box::new(future::err(err)))
    }
}

impl<T, E> From<ErrorKind> for StaticBoxFuture<T, E>
    where E: From<ErrorKind>
{
    fn from(err: ErrorKind) -> Self {
        Self::err(err.into())
    }
}

impl<T, E> Future for StaticBoxFuture<T, E> {
    type Item = T;
    type Error = E;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        self.0.poll()
    }
}

pub trait ToStaticBoxFuture<T, E> {
    fn static_boxed(self) -> StaticBoxFuture<T, E>;
}

impl<F, T, E> ToStaticBoxFuture<T, E> for F
    where F: IntoFuture<Item = T, Error = E> + 'static,
          F::Future: 'static,
          T: 'static,
          E: 'static
{
    fn static_boxed(self) -> StaticBoxFuture<T, E> {
        StaticBoxFuture::new(self)
    }
}
