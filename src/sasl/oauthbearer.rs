use bytes::Bytes;

use futures::future::Future;

use serde_json::Value;

use tokio_io::{AsyncRead, AsyncWrite};

use errors::ErrorKind;
use network::{KafkaConnection, StaticBoxFuture};
use protocol::SaslAuthenticateRequest;
use sasl::{check_auth_response, Credential};

/// One exchange wrapping the bearer token in the OAUTHBEARER envelope
/// (RFC 7628): `n,,^Aauth=Bearer <token>^A^A`.
pub fn authenticate<S>(conn: &KafkaConnection<S>, token: &Credential<String>) -> StaticBoxFuture<()>
    where S: AsyncRead + AsyncWrite + 'static
{
    let conn = conn.clone();

    StaticBoxFuture::new(token.get("token").and_then(move |token| {
        let payload = format!("n,,\x01auth=Bearer {}\x01\x01", token);

        let request = SaslAuthenticateRequest { auth_bytes: Bytes::from(payload.into_bytes()) };

        conn.send(request.descriptor()).and_then(|response| {
            check_auth_response(&response)?;

            // on failure the server answers with a JSON status document
            if !response.auth_bytes.is_empty() {
                if let Ok(value) = ::serde_json::from_slice::<Value>(&response.auth_bytes) {
                    if value.get("status").and_then(Value::as_str) == Some("invalid_token") {
                        bail!(ErrorKind::AuthenticationError("invalid token".to_owned()));
                    }
                }
            }

            Ok(())
        })
    }))
}
