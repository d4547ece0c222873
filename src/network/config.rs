use std::borrow::Cow;
use std::time::Duration;

/// Milliseconds to wait for a socket to become ready before the connect
/// attempt fails.
pub const DEFAULT_CONNECT_TIMEOUT_MILLIS: u64 = 5000;

/// Maximum concurrent outstanding requests on one connection; further
/// sends queue until a response frees a slot.
pub const DEFAULT_MAX_INFLIGHT: usize = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Client identifier sent in every request header.
    #[serde(rename = "client.id")]
    pub client_id: Option<String>,

    /// Connect timeout in milliseconds.
    #[serde(rename = "connect.timeout.ms")]
    pub connect_timeout: u64,

    /// Maximum in-flight requests per connection.
    #[serde(rename = "max.in.flight.requests.per.connection")]
    pub max_inflight: usize,

    /// Opaque tag grouping connections for diagnostics.
    #[serde(rename = "owner.id")]
    pub owner_id: Option<String>,

    /// Register prometheus metrics for this connection's requests.
    pub metrics: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            client_id: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_MILLIS,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            owner_id: None,
            metrics: false,
        }
    }
}

impl ConnectionConfig {
    pub fn with_client_id<S: Into<String>>(client_id: S) -> Self {
        ConnectionConfig {
            client_id: Some(client_id.into()),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn client_id(&self) -> Option<Cow<str>> {
        self.client_id.as_ref().map(|s| Cow::from(s.as_str()))
    }
}
