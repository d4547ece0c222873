//! SASL authentication over an established connection.
//!
//! Every mechanism is a sequence of SaslAuthenticate round-trips on a
//! connection that has already completed the SaslHandshake. The broker
//! error code 58 (`SaslAuthenticationFailed`) and any mechanism-level
//! failure surface as the `authentication` error kind.

mod credentials;
mod plain;
mod scram;
mod oauthbearer;

pub use self::credentials::Credential;
pub use self::scram::{ScramAlgorithm, ScramClient, ScramExchange};

use futures::future::Future;

use tokio_io::{AsyncRead, AsyncWrite};

use errors::{ErrorKind, Result};
use network::{ConnectionEvent, KafkaConnection, StaticBoxFuture};
use protocol::{SaslAuthenticateResponse, SaslHandshakeRequest};

/// The future of a completed authentication.
pub type Authenticate = StaticBoxFuture<()>;

/// Mechanism and credentials, together: the variant picks the state
/// machine and carries exactly the secrets it needs.
#[derive(Clone)]
pub enum SaslCredentials {
    Plain {
        /// Optional authorization identity, usually empty.
        authzid: Option<String>,
        username: Credential<String>,
        password: Credential<String>,
    },
    Scram {
        algorithm: ScramAlgorithm,
        username: Credential<String>,
        password: Credential<String>,
    },
    OAuthBearer { token: Credential<String> },
    /// Recognized but not implemented: Kerberos needs a native
    /// dependency this crate does not carry.
    Gssapi,
}

impl SaslCredentials {
    pub fn mechanism(&self) -> &'static str {
        match *self {
            SaslCredentials::Plain { .. } => "PLAIN",
            SaslCredentials::Scram { algorithm, .. } => algorithm.mechanism(),
            SaslCredentials::OAuthBearer { .. } => "OAUTHBEARER",
            SaslCredentials::Gssapi => "GSSAPI",
        }
    }
}

/// Run the SaslHandshake round and the mechanism's exchanges.
pub fn authenticate<S>(conn: &KafkaConnection<S>, credentials: &SaslCredentials) -> Authenticate
    where S: AsyncRead + AsyncWrite + 'static
{
    let mechanism = credentials.mechanism().to_owned();

    if let SaslCredentials::Gssapi = *credentials {
        return Authenticate::err(ErrorKind::UnsupportedMechanism(mechanism).into());
    }

    debug!("authenticating with {}", mechanism);

    let handshake = SaslHandshakeRequest { mechanism: mechanism.clone() };

    let conn = conn.clone();
    let credentials = credentials.clone();

    Authenticate::new(conn.clone()
        .send(handshake.descriptor())
        .and_then(move |response| {
            if response.error_code != 0 {
                bail!(ErrorKind::UnsupportedMechanism(format!("{} (broker enables: {})",
                                                              mechanism,
                                                              response.mechanisms.join(", "))));
            }

            conn.emit_event(ConnectionEvent::SaslHandshake {
                                mechanisms: response.mechanisms,
                            });

            Ok((conn, credentials))
        })
        .and_then(|(conn, credentials)| match credentials {
                      SaslCredentials::Plain { authzid, username, password } => {
                          plain::authenticate(&conn, authzid, &username, &password)
                      }
                      SaslCredentials::Scram { algorithm, username, password } => {
                          scram::authenticate(&conn, algorithm, &username, &password)
                      }
                      SaslCredentials::OAuthBearer { token } => {
                          oauthbearer::authenticate(&conn, &token)
                      }
                      SaslCredentials::Gssapi => {
                          StaticBoxFuture::err(ErrorKind::UnsupportedMechanism("GSSAPI"
                                                                                   .to_owned())
                                                   .into())
                      }
                  }
                  .map(move |_| conn))
        .map(|conn| {
                 conn.emit_event(ConnectionEvent::SaslAuthenticated);
             }))
}

/// Broker-level check shared by every mechanism round.
pub(crate) fn check_auth_response(response: &SaslAuthenticateResponse) -> Result<()> {
    if response.error_code != 0 {
        let reason = response
            .error_message
            .clone()
            .unwrap_or_else(|| format!("broker error code {}", response.error_code));

        bail!(ErrorKind::AuthenticationError(reason));
    }

    Ok(())
}
