use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::result::Result as StdResult;

use futures::unsync::oneshot;
use futures::{Async, Future, Poll, Stream};
use tokio_core::reactor::Handle;

use errors::{Error, ErrorKind};
use network::{ConnectionConfig, ConnectionEvent, KafkaConnection, TlsConfig};

/// Connections indexed by `host:port`, opened on demand.
///
/// A second `get` for an address whose connection is still opening joins
/// the in-progress attempt instead of dialing again. Entries fall out of
/// the table when their connection closes or fails, so the next `get`
/// re-opens.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Rc<RefCell<PoolInner>>,
}

struct PoolInner {
    config: ConnectionConfig,
    tls: Option<TlsConfig>,
    handle: Handle,
    connections: HashMap<String, PoolEntry>,
}

enum PoolEntry {
    /// An open attempt with the senders awaiting it.
    Connecting(Vec<oneshot::Sender<StdResult<KafkaConnection, String>>>),
    Connected(KafkaConnection),
}

impl ConnectionPool {
    pub fn new(config: ConnectionConfig, tls: Option<TlsConfig>, handle: Handle) -> Self {
        ConnectionPool {
            inner: Rc::new(RefCell::new(PoolInner {
                                            config: config,
                                            tls: tls,
                                            handle: handle,
                                            connections: HashMap::new(),
                                        })),
        }
    }

    /// The cached connection for `host:port`, or a fresh one.
    pub fn get(&self, host: &str, port: u16) -> GetConnection {
        let key = format!("{}:{}", host, port);

        let cached = {
            let inner = self.inner.borrow();

            match inner.connections.get(&key) {
                Some(&PoolEntry::Connected(ref conn)) if conn.is_connected() => {
                    Some(conn.clone())
                }
                _ => None,
            }
        };

        if let Some(conn) = cached {
            trace!("pool hit for {}", key);

            return GetConnection { state: GetState::Ready(Some(conn)) };
        }

        let mut inner = self.inner.borrow_mut();

        // join an attempt already in progress
        if let Some(&mut PoolEntry::Connecting(ref mut waiters)) = inner.connections.get_mut(&key) {
            let (tx, rx) = oneshot::channel();

            waiters.push(tx);

            return GetConnection { state: GetState::Waiting(rx) };
        }

        debug!("pool opening connection to {}", key);

        inner
            .connections
            .insert(key.clone(), PoolEntry::Connecting(Vec::new()));

        let (tx, rx) = oneshot::channel();

        match inner.connections.get_mut(&key) {
            Some(&mut PoolEntry::Connecting(ref mut waiters)) => waiters.push(tx),
            _ => {}
        }

        let connect = KafkaConnection::connect(host,
                                               port,
                                               inner.config.clone(),
                                               inner.tls.clone(),
                                               &inner.handle);

        let pool = self.clone();
        let handle = inner.handle.clone();

        handle.spawn(connect.then(move |result| {
                                      pool.opened(key, result);

                                      Ok(())
                                  }));

        GetConnection { state: GetState::Waiting(rx) }
    }

    /// Try each broker in turn; yields the first connection that opens,
    /// or an aggregate of every failure.
    pub fn get_first_available(&self, brokers: Vec<(String, u16)>) -> GetFirstAvailable {
        GetFirstAvailable {
            pool: self.clone(),
            brokers: brokers,
            index: 0,
            current: None,
            errors: Vec::new(),
        }
    }

    /// Close every connection and clear the table.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();

        debug!("pool closing {} connection(s)", inner.connections.len());

        for (_, entry) in inner.connections.drain() {
            match entry {
                PoolEntry::Connected(conn) => conn.close(),
                // dropping the senders cancels the waiters
                PoolEntry::Connecting(_) => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolution of an open attempt: answer the waiters and start the
    /// eviction watcher, or drop the entry so the next `get` retries.
    fn opened(&self, key: String, result: StdResult<KafkaConnection, Error>) {
        let waiters = {
            let mut inner = self.inner.borrow_mut();

            let waiters = match inner.connections.remove(&key) {
                Some(PoolEntry::Connecting(waiters)) => waiters,
                Some(entry @ PoolEntry::Connected(_)) => {
                    // a concurrent close() swept the table; keep the entry
                    inner.connections.insert(key.clone(), entry);

                    Vec::new()
                }
                None => Vec::new(),
            };

            if let Ok(ref conn) = result {
                inner
                    .connections
                    .insert(key.clone(), PoolEntry::Connected(conn.clone()));
            }

            waiters
        };

        match result {
            Ok(conn) => {
                self.watch(key, &conn);

                for waiter in waiters {
                    let _ = waiter.send(Ok(conn.clone()));
                }
            }
            Err(err) => {
                warn!("pool failed to open {}, {}", key, err);

                let reason = err.to_string();

                for waiter in waiters {
                    let _ = waiter.send(Err(reason.clone()));
                }
            }
        }
    }

    /// Evict the entry when its connection closes or fails.
    fn watch(&self, key: String, conn: &KafkaConnection) {
        let pool = self.inner.clone();
        let handle = self.inner.borrow().handle.clone();

        handle.spawn(conn.events()
                         .filter(|event| match *event {
                                     ConnectionEvent::Closed |
                                     ConnectionEvent::Error { .. } => true,
                                     _ => false,
                                 })
                         .into_future()
                         .then(move |_| {
                                   trace!("pool evicting {}", key);

                                   pool.borrow_mut().connections.remove(&key);

                                   Ok(())
                               }));
    }
}

/// The future of a pooled connection.
pub struct GetConnection {
    state: GetState,
}

enum GetState {
    Ready(Option<KafkaConnection>),
    Waiting(oneshot::Receiver<StdResult<KafkaConnection, String>>),
}

impl Future for GetConnection {
    type Item = KafkaConnection;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        match self.state {
            GetState::Ready(ref mut conn) => {
                match conn.take() {
                    Some(conn) => Ok(Async::Ready(conn)),
                    None => bail!(ErrorKind::Canceled("connection already taken")),
                }
            }
            GetState::Waiting(ref mut rx) => {
                match rx.poll() {
                    Ok(Async::Ready(Ok(conn))) => Ok(Async::Ready(conn)),
                    Ok(Async::Ready(Err(reason))) => bail!(ErrorKind::NetworkError(reason)),
                    Ok(Async::NotReady) => Ok(Async::NotReady),
                    Err(_) => bail!(ErrorKind::Canceled("connection attempt abandoned")),
                }
            }
        }
    }
}

/// Sequential fallback over a broker list, accumulating the failures.
pub struct GetFirstAvailable {
    pool: ConnectionPool,
    brokers: Vec<(String, u16)>,
    index: usize,
    current: Option<GetConnection>,
    errors: Vec<Error>,
}

impl Future for GetFirstAvailable {
    type Item = KafkaConnection;
    type Error = Error;

    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        loop {
            if self.current.is_none() {
                match self.brokers.get(self.index) {
                    Some(&(ref host, port)) => {
                        self.current = Some(self.pool.get(host, port));
                        self.index += 1;
                    }
                    None => {
                        let errors = ::std::mem::replace(&mut self.errors, Vec::new());

                        bail!(ErrorKind::MultipleErrors(errors));
                    }
                }
            }

            let result = match self.current {
                Some(ref mut current) => current.poll(),
                None => continue,
            };

            match result {
                Ok(Async::Ready(conn)) => return Ok(Async::Ready(conn)),
                Ok(Async::NotReady) => return Ok(Async::NotReady),
                Err(err) => {
                    trace!("broker {} of {} failed, {}",
                           self.index,
                           self.brokers.len(),
                           err);

                    self.errors.push(err);
                    self.current = None;
                }
            }
        }
    }
}
