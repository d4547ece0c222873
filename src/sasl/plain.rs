use bytes::Bytes;

use futures::future::Future;

use tokio_io::{AsyncRead, AsyncWrite};

use network::{KafkaConnection, StaticBoxFuture};
use protocol::SaslAuthenticateRequest;
use sasl::{check_auth_response, Credential};

/// One exchange: `authzid NUL username NUL password` (RFC 4616).
pub fn authenticate<S>(conn: &KafkaConnection<S>,
                       authzid: Option<String>,
                       username: &Credential<String>,
                       password: &Credential<String>)
                       -> StaticBoxFuture<()>
    where S: AsyncRead + AsyncWrite + 'static
{
    let conn = conn.clone();

    StaticBoxFuture::new(username
        .get("username")
        .join(password.get("password"))
        .and_then(move |(username, password)| {
            let mut auth = Vec::with_capacity(username.len() + password.len() + 2);

            auth.extend_from_slice(authzid.unwrap_or_default().as_bytes());
            auth.push(0);
            auth.extend_from_slice(username.as_bytes());
            auth.push(0);
            auth.extend_from_slice(password.as_bytes());

            let request = SaslAuthenticateRequest { auth_bytes: Bytes::from(auth) };

            conn.send(request.descriptor())
                .and_then(|response| check_auth_response(&response))
        }))
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_plain_payload_layout() {
        // the payload is NUL-joined: authzid, username, password
        let mut auth = Vec::new();

        auth.extend_from_slice(b"");
        auth.push(0);
        auth.extend_from_slice(b"admin");
        auth.push(0);
        auth.extend_from_slice(b"admin-secret");

        assert_eq!(auth, b"\0admin\0admin-secret".to_vec());
    }
}
