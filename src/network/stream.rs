use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::rc::Rc;
use std::time::Duration;

use futures::{Async, Future, Poll};
use tokio_core::net::{TcpStream, TcpStreamNew};
use tokio_core::reactor::{Handle, Timeout};
use tokio_io::{AsyncRead, AsyncWrite};
use tokio_tls::{ConnectAsync, TlsConnectorExt, TlsStream};
use native_tls::TlsConnector;

use errors::{Error, ErrorKind};

/// TLS settings for a connection; presence switches the transport from
/// plain TCP to TLS. Framing above the transport is identical.
#[derive(Clone)]
pub struct TlsConfig {
    pub connector: Rc<TlsConnector>,
    /// Hostname presented for certificate verification.
    pub domain: String,
}

impl TlsConfig {
    pub fn new<S: Into<String>>(connector: TlsConnector, domain: S) -> Self {
        TlsConfig {
            connector: Rc::new(connector),
            domain: domain.into(),
        }
    }
}

/// The transport under a connection: plain TCP or TLS over TCP.
pub enum KafkaStream {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl Read for KafkaStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            KafkaStream::Tcp(ref mut stream) => stream.read(buf),
            KafkaStream::Tls(ref mut stream) => stream.read(buf),
        }
    }
}

impl Write for KafkaStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            KafkaStream::Tcp(ref mut stream) => stream.write(buf),
            KafkaStream::Tls(ref mut stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            KafkaStream::Tcp(ref mut stream) => stream.flush(),
            KafkaStream::Tls(ref mut stream) => stream.flush(),
        }
    }
}

impl AsyncRead for KafkaStream {}

impl AsyncWrite for KafkaStream {
    fn shutdown(&mut self) -> Poll<(), io::Error> {
        match *self {
            KafkaStream::Tcp(ref mut stream) => AsyncWrite::shutdown(stream),
            KafkaStream::Tls(ref mut stream) => stream.shutdown(),
        }
    }
}

/// Opens transports on a reactor.
#[derive(Clone)]
pub struct KafkaConnector {
    handle: Handle,
}

impl KafkaConnector {
    pub fn new(handle: Handle) -> Self {
        KafkaConnector { handle: handle }
    }

    /// Resolve `host:port`, open a socket with TCP_NODELAY and run the
    /// TLS handshake when configured. The returned future fails with the
    /// `timeout` kind if the transport is not ready within `timeout`.
    pub fn connect(&self,
                   host: &str,
                   port: u16,
                   tls: Option<TlsConfig>,
                   timeout: Duration)
                   -> Connect {
        debug!("connecting to {}:{}", host, port);

        let addr = match (host, port).to_socket_addrs().map(|mut addrs| addrs.next()) {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                return Connect::failed(ErrorKind::NetworkError(format!("no address for {}:{}",
                                                                       host,
                                                                       port))
                                           .into())
            }
            Err(err) => return Connect::failed(err.into()),
        };

        Connect {
            state: ConnectState::Connecting(TcpStream::connect(&addr, &self.handle), tls),
            timeout: Timeout::new(timeout, &self.handle).ok(),
        }
    }
}

/// The future of an opening transport.
pub struct Connect {
    state: ConnectState,
    timeout: Option<Timeout>,
}

enum ConnectState {
    Connecting(TcpStreamNew, Option<TlsConfig>),
    Handshaking(ConnectAsync<TcpStream>),
    Failed(Option<Error>),
}

impl Connect {
    fn failed(err: Error) -> Self {
        Connect {
            state: ConnectState::Failed(Some(err)),
            timeout: None,
        }
    }
}

impl Future for Connect {
    type Item = KafkaStream;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        if let Some(ref mut timeout) = self.timeout {
            if timeout.poll()?.is_ready() {
                bail!(ErrorKind::ConnectTimeout);
            }
        }

        loop {
            let state = match self.state {
                ConnectState::Connecting(ref mut future, ref mut tls) => {
                    match future.poll() {
                        Ok(Async::Ready(stream)) => {
                            stream.set_nodelay(true)?;

                            match tls.take() {
                                Some(tls) => {
                                    trace!("socket ready, starting TLS handshake for `{}`",
                                           tls.domain);

                                    ConnectState::Handshaking(
                                        tls.connector.connect_async(&tls.domain, stream))
                                }
                                None => return Ok(Async::Ready(KafkaStream::Tcp(stream))),
                            }
                        }
                        Ok(Async::NotReady) => return Ok(Async::NotReady),
                        Err(err) => {
                            bail!(ErrorKind::NetworkError(format!("fail to connect, {}", err)))
                        }
                    }
                }
                ConnectState::Handshaking(ref mut future) => {
                    match future.poll() {
                        Ok(Async::Ready(stream)) => {
                            return Ok(Async::Ready(KafkaStream::Tls(stream)))
                        }
                        Ok(Async::NotReady) => return Ok(Async::NotReady),
                        Err(err) => {
                            bail!(ErrorKind::NetworkError(format!("TLS handshake failed, {}", err)))
                        }
                    }
                }
                ConnectState::Failed(ref mut err) => {
                    return Err(err.take()
                                   .unwrap_or_else(|| ErrorKind::Canceled("connect polled after failure").into()))
                }
            };

            self.state = state;
        }
    }
}
