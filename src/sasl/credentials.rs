use std::rc::Rc;

use futures::future::{Future, IntoFuture};

use errors::{Error, ErrorKind};
use network::StaticBoxFuture;

/// A credential supplied either as a literal or as a zero-arg producer
/// returning a (possibly deferred) value. Every consumer goes through
/// `get`, which turns an absent value into an `authentication` error.
pub enum Credential<T> {
    Value(T),
    Producer(Rc<Fn() -> StaticBoxFuture<Option<T>>>),
}

impl<T> Clone for Credential<T>
    where T: Clone
{
    fn clone(&self) -> Self {
        match *self {
            Credential::Value(ref value) => Credential::Value(value.clone()),
            Credential::Producer(ref producer) => Credential::Producer(producer.clone()),
        }
    }
}

impl<T> Credential<T>
    where T: Clone + 'static
{
    pub fn value(value: T) -> Self {
        Credential::Value(value)
    }

    pub fn producer<F, R>(producer: F) -> Self
        where F: Fn() -> R + 'static,
              R: IntoFuture<Item = Option<T>, Error = Error> + 'static,
              R::Future: 'static
    {
        Credential::Producer(Rc::new(move || StaticBoxFuture::new(producer())))
    }

    /// Resolve the credential; `what` names it in the failure message.
    pub fn get(&self, what: &'static str) -> StaticBoxFuture<T> {
        match *self {
            Credential::Value(ref value) => StaticBoxFuture::ok(value.clone()),
            Credential::Producer(ref producer) => {
                StaticBoxFuture::new(producer().and_then(move |value| {
                    value.ok_or_else(|| {
                        ErrorKind::AuthenticationError(format!("no {} provided", what)).into()
                    })
                }))
            }
        }
    }
}

impl<'a> From<&'a str> for Credential<String> {
    fn from(value: &'a str) -> Self {
        Credential::Value(value.to_owned())
    }
}

impl From<String> for Credential<String> {
    fn from(value: String) -> Self {
        Credential::Value(value)
    }
}
