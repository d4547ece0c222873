use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering, ATOMIC_USIZE_INIT};

use bytes::{BufMut, Bytes, BytesMut};
use byteorder::{BigEndian, ByteOrder};

use futures::task::{self, Task};
use futures::unsync::{mpsc, oneshot};
use futures::{Async, Future, Poll};
use tokio_core::reactor::Handle;
use tokio_io::{AsyncRead, AsyncWrite};

use hexplay::HexViewBuilder;

use errors::{Error, ErrorKind, Result};
use network::{ApiDescriptor, ConnectionConfig, ConnectionEvent, KafkaConnector, KafkaStream,
              Metrics, NoopTracer, Reply, TlsConfig, Tracer};
use protocol::{parse_tagged_fields, prepend_length, ApiKeys, CorrelationId, Encodable,
               RequestHeader};

use nom::IResult;

static NEXT_CONNECTION_ID: AtomicUsize = ATOMIC_USIZE_INIT;

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    None,
    Connecting,
    Connected,
    Closing,
    Closed,
    Error,
}

/// A single broker connection multiplexing concurrent requests over one
/// socket.
///
/// Cheap to clone; all clones share the same socket and state. The
/// connection is a single-threaded cooperative actor: every mutation of
/// the in-flight table, the queues and the framing state happens either
/// inside a `send`/`close` call or on the driver task spawned next to it.
pub struct KafkaConnection<S = KafkaStream> {
    inner: Rc<RefCell<Inner<S>>>,
}

impl<S> Clone for KafkaConnection<S> {
    fn clone(&self) -> Self {
        KafkaConnection { inner: self.inner.clone() }
    }
}

/// One response-bearing request between dispatch and delivery.
struct InFlight {
    api_key: ApiKeys,
    response_header_tagged: bool,
    complete: Box<FnMut(Result<Bytes>)>,
}

/// How a queued request completes once its bytes are out (or lost).
enum Sink {
    Response(Box<FnMut(Result<Bytes>)>),
    Sent(Box<FnMut(Result<bool>)>),
}

impl Sink {
    fn takes_slot(&self) -> bool {
        match *self {
            Sink::Response(_) => true,
            Sink::Sent(_) => false,
        }
    }
}

/// A framed request waiting for an in-flight slot.
struct QueuedRequest {
    correlation_id: CorrelationId,
    api_key: ApiKeys,
    response_header_tagged: bool,
    frame: BytesMut,
    sink: Sink,
}

/// Framed bytes blocked on socket back-pressure, with the write offset
/// already taken by the socket.
struct PendingWrite {
    frame: BytesMut,
    written: usize,
    sent: Option<Box<FnMut(Result<bool>)>>,
}

struct Inner<S> {
    id: usize,
    config: ConnectionConfig,
    stream: Option<S>,
    state: ConnectionState,
    correlation_id: CorrelationId,
    in_flight: HashMap<CorrelationId, InFlight>,
    /// Requests waiting for an in-flight slot, FIFO.
    queue: VecDeque<QueuedRequest>,
    /// Frames blocked on back-pressure, drained FIFO on writable.
    pending: VecDeque<PendingWrite>,
    must_drain: bool,
    /// Inbound framing: -1 until the next length prefix is known.
    next_frame_length: i32,
    recv_buf: BytesMut,
    subscribers: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
    driver_task: Option<Task>,
    tracer: Rc<Tracer>,
    metrics: Option<&'static Metrics>,
}

impl KafkaConnection<KafkaStream> {
    /// Open a transport to `host:port` (TLS when configured) and drive
    /// the connection on `handle`. Fails with the `timeout` kind if the
    /// configured connect timeout elapses first.
    pub fn connect(host: &str,
                   port: u16,
                   config: ConnectionConfig,
                   tls: Option<TlsConfig>,
                   handle: &Handle)
                   -> Connecting {
        let connect =
            KafkaConnector::new(handle.clone()).connect(host, port, tls, config.connect_timeout());

        Connecting {
            connect: connect,
            config: Some(config),
            handle: handle.clone(),
        }
    }
}

impl<S> KafkaConnection<S>
    where S: AsyncRead + AsyncWrite + 'static
{
    /// Adopt an already-open transport and spawn the driver on `handle`.
    pub fn from_stream(stream: S, config: ConnectionConfig, handle: &Handle) -> KafkaConnection<S> {
        let (conn, driver) = Self::with_stream(stream, config);

        handle.spawn(driver);

        conn
    }

    fn with_stream(stream: S, config: ConnectionConfig) -> (KafkaConnection<S>, Driver<S>) {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let metrics = if config.metrics {
            Metrics::shared()
        } else {
            None
        };

        debug!("connection #{} established, owner {:?}",
               id,
               config.owner_id);

        let inner = Rc::new(RefCell::new(Inner {
                                             id: id,
                                             config: config,
                                             stream: Some(stream),
                                             state: ConnectionState::Connected,
                                             correlation_id: 0,
                                             in_flight: HashMap::new(),
                                             queue: VecDeque::new(),
                                             pending: VecDeque::new(),
                                             must_drain: false,
                                             next_frame_length: -1,
                                             recv_buf: BytesMut::with_capacity(16 * 1024),
                                             subscribers: Vec::new(),
                                             driver_task: None,
                                             tracer: Rc::new(NoopTracer),
                                             metrics: metrics,
                                         }));

        inner.borrow_mut().emit(ConnectionEvent::Connected);

        (KafkaConnection { inner: inner.clone() }, Driver { inner: inner })
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Outstanding response-bearing requests.
    pub fn in_flight(&self) -> usize {
        self.inner.borrow().in_flight.len()
    }

    /// Install a diagnostics tracer; replaces the no-op default.
    pub fn set_tracer(&self, tracer: Rc<Tracer>) {
        self.inner.borrow_mut().tracer = tracer;
    }

    /// Subscribe to lifecycle events. Events emitted before the call are
    /// not replayed.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded();

        self.inner.borrow_mut().subscribers.push(tx);

        rx
    }

    /// The callback primitive behind `send`.
    ///
    /// Assigns the next correlation id, frames the request and hands it
    /// to the socket, honoring `max_inflight` and back-pressure. Returns
    /// whether the socket accepted every outstanding byte without
    /// blocking, so callers can throttle on `false` and resume on the
    /// `Drain` event.
    ///
    /// The completion runs on the connection's actor; it must not call
    /// back into the connection synchronously.
    pub fn send_with<T, F>(&self, api: ApiDescriptor<T>, completion: F) -> Result<bool>
        where T: 'static,
              F: FnOnce(Result<T>) + 'static
    {
        self.inner.borrow_mut().send(api, completion)
    }

    /// Future adaptor over `send_with`.
    pub fn send<T: 'static>(&self, api: ApiDescriptor<T>) -> SendRequest<T> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);

        match self.send_with(api, move |result| if let Some(tx) = tx.take() {
            let _ = tx.send(result);
        }) {
            Ok(accepted) => {
                SendRequest {
                    accepted: accepted,
                    state: SendRequestState::Waiting(rx),
                }
            }
            Err(err) => {
                SendRequest {
                    accepted: false,
                    state: SendRequestState::Failed(Some(err)),
                }
            }
        }
    }

    /// Half-close the write side and wait for the peer to close. Every
    /// request still outstanding when the peer closes fails with a
    /// `network` error.
    pub fn close(&self) {
        self.inner.borrow_mut().close();
    }

    pub(crate) fn emit_event(&self, event: ConnectionEvent) {
        self.inner.borrow_mut().emit(event);
    }
}

impl<S> Inner<S>
    where S: AsyncRead + AsyncWrite
{
    fn next_correlation_id(&mut self) -> CorrelationId {
        let id = self.correlation_id;

        self.correlation_id = self.correlation_id.wrapping_add(1);

        id
    }

    fn send<T, F>(&mut self, api: ApiDescriptor<T>, completion: F) -> Result<bool>
        where T: 'static,
              F: FnOnce(Result<T>) + 'static
    {
        if self.state != ConnectionState::Connected {
            bail!(ErrorKind::NetworkError(format!("sending on a {:?} connection", self.state)));
        }

        let correlation_id = self.next_correlation_id();

        self.tracer
            .request_start(api.api_key, api.api_version, correlation_id);

        if let Some(metrics) = self.metrics {
            metrics.request(api.api_key);
        }

        let client_id = self.config.client_id.clone();

        let mut frame = BytesMut::with_capacity(256);

        frame.put_i32::<BigEndian>(0); // length, patched below

        RequestHeader {
                api_key: api.api_key.key(),
                api_version: api.api_version,
                correlation_id: correlation_id,
                client_id: client_id.map(Cow::from),
                flexible: api.request_header_tagged,
            }
            .encode::<BigEndian>(&mut frame)?;

        (api.encode)(&mut frame)?;

        prepend_length(&mut frame)?;

        let mut completion = Some(completion);

        let sink = match api.reply {
            Reply::Response(parse) => {
                Sink::Response(Box::new(move |result: Result<Bytes>| {
                    if let Some(completion) = completion.take() {
                        completion(result.and_then(|body| parse(&body)));
                    }
                }))
            }
            Reply::Sent(map) => {
                Sink::Sent(Box::new(move |result: Result<bool>| {
                    if let Some(completion) = completion.take() {
                        completion(result.map(|more| map(more)));
                    }
                }))
            }
        };

        self.queue
            .push_back(QueuedRequest {
                           correlation_id: correlation_id,
                           api_key: api.api_key,
                           response_header_tagged: api.response_header_tagged,
                           frame: frame,
                           sink: sink,
                       });

        Ok(self.dispatch())
    }

    /// Move queued requests to the socket while in-flight slots last.
    /// Returns whether nothing remains buffered anywhere.
    fn dispatch(&mut self) -> bool {
        loop {
            let ready = match self.queue.front() {
                Some(request) => {
                    !request.sink.takes_slot() ||
                    self.in_flight.len() < self.config.max_inflight
                }
                None => false,
            };

            if !ready {
                break;
            }

            if let Some(request) = self.queue.pop_front() {
                self.dispatch_one(request);
            }
        }

        !self.must_drain && self.queue.is_empty() && self.pending.is_empty()
    }

    fn dispatch_one(&mut self, request: QueuedRequest) {
        match request.sink {
            Sink::Response(complete) => {
                self.in_flight
                    .insert(request.correlation_id,
                            InFlight {
                                api_key: request.api_key,
                                response_header_tagged: request.response_header_tagged,
                                complete: complete,
                            });

                if let Some(metrics) = self.metrics {
                    metrics.in_flight_inc();
                }

                self.write_frame(request.frame, None);
            }
            Sink::Sent(complete) => {
                self.write_frame(request.frame, Some(complete));
            }
        }
    }

    fn write_frame(&mut self, frame: BytesMut, sent: Option<Box<FnMut(Result<bool>)>>) {
        if self.must_drain {
            self.pending
                .push_back(PendingWrite {
                               frame: frame,
                               written: 0,
                               sent: sent,
                           });

            return;
        }

        trace!("connection #{} sending frame:\n{}",
               self.id,
               HexViewBuilder::new(&frame).row_width(16).finish());

        let mut written = 0;
        let mut sent = sent;

        loop {
            let res = match self.stream {
                Some(ref mut stream) => stream.write(&frame[written..]),
                None => return,
            };

            match res {
                Ok(0) => {
                    if let Some(ref mut cb) = sent {
                        cb(Err(ErrorKind::NetworkError("socket closed during write".to_owned())
                                   .into()));
                    }

                    self.fail(ErrorKind::NetworkError("socket closed during write".to_owned())
                                  .into());

                    return;
                }
                Ok(n) => {
                    written += n;

                    if written == frame.len() {
                        if let Some(ref mut cb) = sent {
                            cb(Ok(true));
                        }

                        return;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    trace!("connection #{} blocked after {} of {} bytes",
                           self.id,
                           written,
                           frame.len());

                    self.must_drain = true;
                    self.pending
                        .push_back(PendingWrite {
                                       frame: frame,
                                       written: written,
                                       sent: sent,
                                   });
                    self.notify_driver();

                    return;
                }
                Err(err) => {
                    if let Some(ref mut cb) = sent {
                        cb(Err(ErrorKind::NetworkError(err.to_string()).into()));
                    }

                    self.fail(err.into());

                    return;
                }
            }
        }
    }

    /// Drain the pending queue head-first after the socket signalled
    /// writable again; emits `Drain` when the last blocked byte is out.
    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        while let Some(mut pending) = self.pending.pop_front() {
            loop {
                let res = match self.stream {
                    Some(ref mut stream) => stream.write(&pending.frame[pending.written..]),
                    None => return,
                };

                match res {
                    Ok(0) => {
                        if let Some(ref mut cb) = pending.sent {
                            cb(Err(ErrorKind::NetworkError("socket closed during write"
                                                               .to_owned())
                                       .into()));
                        }

                        self.fail(ErrorKind::NetworkError("socket closed during write"
                                                              .to_owned())
                                      .into());

                        return;
                    }
                    Ok(n) => {
                        pending.written += n;

                        if pending.written == pending.frame.len() {
                            if let Some(ref mut cb) = pending.sent {
                                cb(Ok(true));
                            }

                            break;
                        }
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                        self.must_drain = true;
                        self.pending.push_front(pending);

                        return;
                    }
                    Err(err) => {
                        if let Some(ref mut cb) = pending.sent {
                            cb(Err(ErrorKind::NetworkError(err.to_string()).into()));
                        }

                        self.fail(err.into());

                        return;
                    }
                }
            }
        }

        if self.must_drain {
            self.must_drain = false;

            self.emit(ConnectionEvent::Drain);
        }

        self.dispatch();
    }

    /// Pull inbound bytes and deliver complete frames. `Ready` means the
    /// connection terminated.
    fn poll_read(&mut self) -> Async<()> {
        loop {
            let mut chunk = [0u8; 16 * 1024];

            let res = match self.stream {
                Some(ref mut stream) => stream.read(&mut chunk),
                None => return Async::Ready(()),
            };

            match res {
                Ok(0) => {
                    trace!("connection #{} closed by peer", self.id);

                    self.fail(ErrorKind::NetworkError("connection closed".to_owned()).into());

                    return Async::Ready(());
                }
                Ok(n) => {
                    self.recv_buf.extend_from_slice(&chunk[..n]);

                    if let Err(err) = self.process_frames() {
                        self.fail(err);

                        return Async::Ready(());
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Async::NotReady;
                }
                Err(err) => {
                    self.fail(err.into());

                    return Async::Ready(());
                }
            }
        }
    }

    fn process_frames(&mut self) -> Result<()> {
        loop {
            if self.next_frame_length < 0 {
                if self.recv_buf.len() < 4 {
                    return Ok(());
                }

                let prefix = self.recv_buf.split_to(4);

                self.next_frame_length = BigEndian::read_i32(&prefix);

                if self.next_frame_length < 4 {
                    bail!(ErrorKind::CodecError("invalid frame length"));
                }
            }

            if self.recv_buf.len() < self.next_frame_length as usize {
                return Ok(());
            }

            let frame = self.recv_buf
                .split_to(self.next_frame_length as usize)
                .freeze();

            self.next_frame_length = -1;

            self.handle_frame(frame);
        }
    }

    fn handle_frame(&mut self, frame: Bytes) {
        trace!("connection #{} received frame:\n{}",
               self.id,
               HexViewBuilder::new(&frame).row_width(16).finish());

        let correlation_id = BigEndian::read_i32(&frame);

        match self.in_flight.remove(&correlation_id) {
            Some(mut request) => {
                if let Some(metrics) = self.metrics {
                    metrics.in_flight_dec();
                }

                let mut body = frame.slice_from(4);

                if request.response_header_tagged {
                    match parse_tagged_fields(&body) {
                        IResult::Done(rest, _) => {
                            let consumed = body.len() - rest.len();

                            body = body.slice_from(consumed);
                        }
                        _ => {
                            self.tracer
                                .request_end(request.api_key, correlation_id, false);

                            (request.complete)(Err(ErrorKind::CodecError("malformed response header")
                                                       .into()));

                            self.dispatch();

                            return;
                        }
                    }
                }

                self.tracer
                    .request_end(request.api_key, correlation_id, true);

                (request.complete)(Ok(body));

                // a slot was freed
                self.dispatch();
            }
            None => {
                warn!("connection #{} received frame with unexpected correlation id {}",
                      self.id,
                      correlation_id);

                self.emit(ConnectionEvent::UnexpectedCorrelation {
                              correlation_id: correlation_id,
                              frame: frame,
                          });
            }
        }
    }

    fn close(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }

        debug!("connection #{} closing, {} in flight, {} queued, {} pending",
               self.id,
               self.in_flight.len(),
               self.queue.len(),
               self.pending.len());

        self.state = ConnectionState::Closing;

        if let Some(ref mut stream) = self.stream {
            let _ = stream.shutdown();
        }

        self.notify_driver();
    }

    /// Terminal path: fail every outstanding and buffered request exactly
    /// once and drop the socket.
    fn fail(&mut self, err: Error) {
        if self.state == ConnectionState::Closed {
            return;
        }

        let was_closing = self.state == ConnectionState::Closing;

        self.state = ConnectionState::Closed;
        self.stream = None;

        let reason = err.to_string();

        debug!("connection #{} failed, {}; {} in flight, {} queued, {} pending",
               self.id,
               reason,
               self.in_flight.len(),
               self.queue.len(),
               self.pending.len());

        for (_, mut request) in self.in_flight.drain() {
            if let Some(metrics) = self.metrics {
                metrics.in_flight_dec();
            }

            (request.complete)(Err(ErrorKind::NetworkError(reason.clone()).into()));
        }

        while let Some(mut pending) = self.pending.pop_front() {
            if let Some(ref mut cb) = pending.sent {
                cb(Err(ErrorKind::NetworkError(reason.clone()).into()));
            }
        }

        while let Some(request) = self.queue.pop_front() {
            match request.sink {
                Sink::Response(mut complete) => {
                    complete(Err(ErrorKind::NetworkError(reason.clone()).into()))
                }
                Sink::Sent(mut complete) => {
                    complete(Err(ErrorKind::NetworkError(reason.clone()).into()))
                }
            }
        }

        if !was_closing {
            self.emit(ConnectionEvent::Error { reason: reason });
        }

        self.emit(ConnectionEvent::Closed);
    }

    fn emit(&mut self, event: ConnectionEvent) {
        trace!("connection #{} event: {:?}", self.id, event);

        self.tracer.connection_event(&event);

        self.subscribers
            .retain(|sender| sender.unbounded_send(event.clone()).is_ok());
    }

    fn notify_driver(&self) {
        if let Some(ref task) = self.driver_task {
            task.notify();
        }
    }
}

/// The connection's actor: pumps the socket in both directions until the
/// connection terminates.
pub struct Driver<S> {
    inner: Rc<RefCell<Inner<S>>>,
}

impl<S> Future for Driver<S>
    where S: AsyncRead + AsyncWrite
{
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        let mut inner = self.inner.borrow_mut();

        if inner.state == ConnectionState::Closed {
            return Ok(Async::Ready(()));
        }

        inner.driver_task = Some(task::current());

        inner.flush_pending();

        match inner.poll_read() {
            Async::Ready(()) => Ok(Async::Ready(())),
            Async::NotReady => {
                if inner.state == ConnectionState::Closed {
                    Ok(Async::Ready(()))
                } else {
                    Ok(Async::NotReady)
                }
            }
        }
    }
}

/// The future of an opening connection.
pub struct Connecting {
    connect: ::network::Connect,
    config: Option<ConnectionConfig>,
    handle: Handle,
}

impl Future for Connecting {
    type Item = KafkaConnection<KafkaStream>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        let stream = try_ready!(self.connect.poll());

        let config = self.config.take().unwrap_or_default();

        Ok(Async::Ready(KafkaConnection::from_stream(stream, config, &self.handle)))
    }
}

/// The future of a response, produced by `KafkaConnection::send`.
pub struct SendRequest<T> {
    accepted: bool,
    state: SendRequestState<T>,
}

enum SendRequestState<T> {
    Waiting(oneshot::Receiver<Result<T>>),
    Failed(Option<Error>),
}

impl<T> SendRequest<T> {
    /// Whether the socket took every framed byte without blocking; when
    /// `false`, the caller should hold off until the `Drain` event.
    pub fn accepted(&self) -> bool {
        self.accepted
    }
}

impl<T> Future for SendRequest<T> {
    type Item = T;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        match self.state {
            SendRequestState::Waiting(ref mut rx) => {
                match rx.poll() {
                    Ok(Async::Ready(result)) => result.map(Async::Ready),
                    Ok(Async::NotReady) => Ok(Async::NotReady),
                    Err(_) => bail!(ErrorKind::Canceled("request canceled")),
                }
            }
            SendRequestState::Failed(ref mut err) => {
                Err(err.take()
                        .unwrap_or_else(|| ErrorKind::Canceled("request polled after failure").into()))
            }
        }
    }
}

impl<T> SendRequest<T> {
    /// Race the response against a timer.
    ///
    /// The connection keeps no per-request timer of its own; callers that
    /// want one wrap the response future here. Losing the race cancels
    /// only this request, never the connection.
    pub fn with_timeout(self, timer: &::tokio_timer::Timer, duration: ::std::time::Duration)
                        -> TimedRequest<T> {
        TimedRequest {
            request: self,
            sleep: timer.sleep(duration),
        }
    }
}

/// A response future bounded by a caller-side timer.
pub struct TimedRequest<T> {
    request: SendRequest<T>,
    sleep: ::tokio_timer::Sleep,
}

impl<T> Future for TimedRequest<T> {
    type Item = T;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        match self.request.poll()? {
            Async::Ready(response) => return Ok(Async::Ready(response)),
            Async::NotReady => {}
        }

        match self.sleep.poll() {
            Ok(Async::Ready(())) => bail!(ErrorKind::Canceled("request timed out")),
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Err(err) => bail!(ErrorKind::NetworkError(format!("timer failed, {}", err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures::future::{self, Future};
    use futures::Stream;

    use protocol::ApiKeys;
    use super::*;

    /// A scripted transport: reads serve from a buffer, writes land in a
    /// buffer, and both sides can be told to block or close.
    #[derive(Clone)]
    struct MockStream {
        written: Rc<RefCell<Vec<u8>>>,
        incoming: Rc<RefCell<Vec<u8>>>,
        /// Bytes `write` accepts before signalling not-writable;
        /// `None` = unlimited.
        write_budget: Rc<Cell<Option<usize>>>,
        eof: Rc<Cell<bool>>,
    }

    impl MockStream {
        fn new() -> MockStream {
            MockStream {
                written: Rc::new(RefCell::new(Vec::new())),
                incoming: Rc::new(RefCell::new(Vec::new())),
                write_budget: Rc::new(Cell::new(None)),
                eof: Rc::new(Cell::new(false)),
            }
        }

        fn feed(&self, data: &[u8]) {
            self.incoming.borrow_mut().extend_from_slice(data);
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut incoming = self.incoming.borrow_mut();

            if incoming.is_empty() {
                if self.eof.get() {
                    return Ok(0);
                }

                return Err(io::ErrorKind::WouldBlock.into());
            }

            let n = ::std::cmp::min(buf.len(), incoming.len());

            buf[..n].copy_from_slice(&incoming[..n]);
            incoming.drain(..n);

            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = match self.write_budget.get() {
                Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
                Some(budget) => {
                    let n = ::std::cmp::min(budget, buf.len());

                    self.write_budget.set(Some(budget - n));

                    n
                }
                None => buf.len(),
            };

            self.written.borrow_mut().extend_from_slice(&buf[..n]);

            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AsyncRead for MockStream {}

    impl AsyncWrite for MockStream {
        fn shutdown(&mut self) -> Poll<(), io::Error> {
            Ok(Async::Ready(()))
        }
    }

    fn echo_api() -> ApiDescriptor<Vec<u8>> {
        ApiDescriptor::new(ApiKeys::ApiVersions,
                           0,
                           false,
                           false,
                           |buf| {
                               buf.put_slice(b"ping");
                               Ok(())
                           },
                           |body| Ok(body.to_vec()))
    }

    fn connection(config: ConnectionConfig)
                  -> (MockStream, KafkaConnection<MockStream>, Driver<MockStream>) {
        let stream = MockStream::new();
        let (conn, driver) = KafkaConnection::with_stream(stream.clone(), config);

        (stream, conn, driver)
    }

    /// Correlation ids of the request frames sitting in `written`.
    fn written_correlation_ids(written: &[u8]) -> Vec<CorrelationId> {
        let mut ids = Vec::new();
        let mut rest = written;

        while rest.len() >= 4 {
            let len = BigEndian::read_i32(rest) as usize;
            let frame = &rest[4..4 + len];

            // header: api_key, api_version, correlation_id
            ids.push(BigEndian::read_i32(&frame[4..]));

            rest = &rest[4 + len..];
        }

        ids
    }

    fn response_frame(correlation_id: CorrelationId, body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();

        frame.extend_from_slice(&[0, 0, 0, 0]);
        BigEndian::write_i32(&mut frame[0..4], 4 + body.len() as i32);

        let mut corr = [0u8; 4];
        BigEndian::write_i32(&mut corr, correlation_id);
        frame.extend_from_slice(&corr);
        frame.extend_from_slice(body);

        frame
    }

    fn drive<S>(driver: &mut Driver<S>)
        where S: AsyncRead + AsyncWrite
    {
        future::lazy(|| -> ::std::result::Result<(), ()> {
                         let _ = driver.poll();

                         Ok(())
                     })
            .wait()
            .unwrap();
    }

    #[test]
    fn test_concurrent_sends_correlate() {
        let (stream, conn, mut driver) = connection(ConnectionConfig::default());

        let first = conn.send(echo_api());
        let second = conn.send(echo_api());
        let third = conn.send(echo_api());

        assert!(first.accepted() && second.accepted() && third.accepted());
        assert_eq!(conn.in_flight(), 3);

        let ids = written_correlation_ids(&stream.written.borrow());

        assert_eq!(ids, vec![0, 1, 2]);

        // deliver in broker order
        for id in &ids {
            stream.feed(&response_frame(*id, format!("re:{}", id).as_bytes()));
        }

        drive(&mut driver);

        assert_eq!(first.wait().unwrap(), b"re:0".to_vec());
        assert_eq!(second.wait().unwrap(), b"re:1".to_vec());
        assert_eq!(third.wait().unwrap(), b"re:2".to_vec());
        assert_eq!(conn.in_flight(), 0);
        assert!(conn.is_connected());
    }

    #[test]
    fn test_max_inflight_queues_excess() {
        let mut config = ConnectionConfig::default();
        config.max_inflight = 2;

        let (stream, conn, mut driver) = connection(config);

        let requests: Vec<_> = (0..4).map(|_| conn.send(echo_api())).collect();

        // two dispatched, two queued
        assert_eq!(conn.in_flight(), 2);
        assert_eq!(written_correlation_ids(&stream.written.borrow()), vec![0, 1]);

        stream.feed(&response_frame(0, b"a"));
        drive(&mut driver);

        // a freed slot dispatches the next queued request
        assert_eq!(written_correlation_ids(&stream.written.borrow()), vec![0, 1, 2]);

        stream.feed(&response_frame(1, b"b"));
        stream.feed(&response_frame(2, b"c"));
        stream.feed(&response_frame(3, b"d"));
        drive(&mut driver);

        let results: Vec<_> = requests
            .into_iter()
            .map(|request| request.wait().unwrap())
            .collect();

        assert_eq!(results,
                   vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    /// Write back-pressure: a blocked socket parks frames on the pending
    /// queue; they drain FIFO once the socket is writable again and every
    /// completion still fires with the right correlation.
    #[test]
    fn test_write_backpressure_drains_fifo() {
        let mut config = ConnectionConfig::default();
        config.max_inflight = 10;

        let (stream, conn, mut driver) = connection(config);

        // the socket takes only the first 10 bytes, mid-frame
        stream.write_budget.set(Some(10));

        let requests: Vec<_> = (0..10).map(|_| conn.send(echo_api())).collect();

        assert!(!requests[0].accepted());
        assert_eq!(conn.in_flight(), 10);

        let events = conn.events();

        // unblock the socket and let the driver drain
        stream.write_budget.set(None);
        drive(&mut driver);

        let ids = written_correlation_ids(&stream.written.borrow());

        assert_eq!(ids, (0..10).collect::<Vec<_>>());

        for id in &ids {
            stream.feed(&response_frame(*id, format!("{}", id).as_bytes()));
        }

        drive(&mut driver);

        for (id, request) in requests.into_iter().enumerate() {
            assert_eq!(request.wait().unwrap(), format!("{}", id).into_bytes());
        }

        // the drain was announced
        let (event, _) = future::lazy(|| events.into_future())
            .wait()
            .map_err(|_| ())
            .unwrap();

        match event {
            Some(ConnectionEvent::Drain) => {}
            other => panic!("expected drain event, got {:?}", other),
        }
    }

    /// A well-framed response with an unknown correlation id is an event,
    /// not a connection failure.
    #[test]
    fn test_unexpected_correlation_id() {
        let (stream, conn, mut driver) = connection(ConnectionConfig::default());

        let events = conn.events();

        stream.feed(&response_frame(99, b"orphan"));
        drive(&mut driver);

        assert!(conn.is_connected());

        let (event, _) = future::lazy(|| events.into_future())
            .wait()
            .map_err(|_| ())
            .unwrap();

        match event {
            Some(ConnectionEvent::UnexpectedCorrelation { correlation_id, ref frame }) => {
                assert_eq!(correlation_id, 99);
                assert_eq!(&frame[4..], b"orphan");
            }
            other => panic!("expected unexpected-correlation event, got {:?}", other),
        }
    }

    /// Closing fails every outstanding request, including those parked on
    /// the pending queue, exactly once.
    #[test]
    fn test_close_fails_outstanding() {
        let (stream, conn, mut driver) = connection(ConnectionConfig::default());

        let first = conn.send(echo_api());

        stream.write_budget.set(Some(0));

        let second = conn.send(echo_api());

        assert!(!second.accepted());

        conn.close();

        // peer closes in response to the half-close
        stream.eof.set(true);
        drive(&mut driver);

        assert_eq!(conn.state(), ConnectionState::Closed);

        for request in vec![first, second] {
            match *request.wait().unwrap_err().kind() {
                ErrorKind::NetworkError(_) => {}
                ref kind => panic!("expected network error, got {:?}", kind),
            }
        }
    }

    /// Fire-and-forget requests occupy no in-flight slot and complete
    /// synchronously once their bytes are out.
    #[test]
    fn test_fire_and_forget_completes_synchronously() {
        let (stream, conn, _driver) = connection(ConnectionConfig::default());

        let api: ApiDescriptor<bool> = ApiDescriptor::fire_and_forget(ApiKeys::Produce,
                                                                      11,
                                                                      true,
                                                                      |buf| {
                                                                          buf.put_slice(b"fire");
                                                                          Ok(())
                                                                      },
                                                                      |more| more);

        let request = conn.send(api);

        assert!(request.accepted());
        assert_eq!(conn.in_flight(), 0);
        assert!(request.wait().unwrap());

        // the frame reached the socket
        assert_eq!(written_correlation_ids(&stream.written.borrow()), vec![0]);
    }

    #[test]
    fn test_send_on_closed_connection() {
        let (stream, conn, mut driver) = connection(ConnectionConfig::default());

        stream.eof.set(true);
        drive(&mut driver);

        assert_eq!(conn.state(), ConnectionState::Closed);

        let request = conn.send(echo_api());

        assert!(!request.accepted());

        match *request.wait().unwrap_err().kind() {
            ErrorKind::NetworkError(_) => {}
            ref kind => panic!("expected network error, got {:?}", kind),
        }
    }

    /// Responses split across reads reassemble through the framing state.
    #[test]
    fn test_fragmented_frames() {
        let (stream, conn, mut driver) = connection(ConnectionConfig::default());

        let request = conn.send(echo_api());

        let frame = response_frame(0, b"fragmented");

        stream.feed(&frame[..3]);
        drive(&mut driver);

        assert_eq!(conn.in_flight(), 1);

        stream.feed(&frame[3..7]);
        drive(&mut driver);

        stream.feed(&frame[7..]);
        drive(&mut driver);

        assert_eq!(request.wait().unwrap(), b"fragmented".to_vec());
    }

    /// The flexible response-header flavor consumes the tagged-field
    /// block before the body reaches the parser.
    #[test]
    fn test_response_header_tagged_fields() {
        let (stream, conn, mut driver) = connection(ConnectionConfig::default());

        let api = ApiDescriptor::new(ApiKeys::Metadata,
                                     12,
                                     true,
                                     true,
                                     |buf| {
                                         buf.put_slice(b"req");
                                         Ok(())
                                     },
                                     |body: &[u8]| Ok(body.to_vec()));

        let request = conn.send(api);

        let mut body = vec![0]; // empty tagged-field block
        body.extend_from_slice(b"payload");

        stream.feed(&response_frame(0, &body));
        drive(&mut driver);

        assert_eq!(request.wait().unwrap(), b"payload".to_vec());
    }
}
