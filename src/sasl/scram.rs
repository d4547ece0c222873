use std::str;

use bytes::Bytes;

use futures::future::Future;

use rand::{self, Rng};

use sha2::{Digest, Sha256, Sha512};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;

use tokio_io::{AsyncRead, AsyncWrite};

use errors::{ErrorKind, Result};
use network::{KafkaConnection, StaticBoxFuture};
use protocol::SaslAuthenticateRequest;
use sasl::{check_auth_response, Credential};

/// Minimum PBKDF2 iteration count a server may demand (RFC 5802 §5.1,
/// raised to the SHA-2 floor by RFC 7677).
const MIN_ITERATIONS: u32 = 4096;

/// Base64 of the GS2 header `n,,` (no channel binding).
const GS2_HEADER_BASE64: &'static str = "biws";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScramAlgorithm {
    Sha256,
    Sha512,
}

impl ScramAlgorithm {
    pub fn mechanism(&self) -> &'static str {
        match *self {
            ScramAlgorithm::Sha256 => "SCRAM-SHA-256",
            ScramAlgorithm::Sha512 => "SCRAM-SHA-512",
        }
    }

    fn key_len(&self) -> usize {
        match *self {
            ScramAlgorithm::Sha256 => 32,
            ScramAlgorithm::Sha512 => 64,
        }
    }
}

/// The client side of one SCRAM exchange (RFC 5802 §5).
///
/// Transport-free: the caller moves the messages over SaslAuthenticate
/// frames and feeds the server's answers back in.
pub struct ScramClient {
    algorithm: ScramAlgorithm,
    username: String,
    password: String,
    nonce: String,
}

/// Computed at the second step: the message to send and the server
/// signature that must come back.
pub struct ScramExchange {
    pub final_message: String,
    server_signature: String,
}

impl ScramClient {
    pub fn new(algorithm: ScramAlgorithm, username: &str, password: &str) -> Self {
        let mut nonce = [0u8; 16];

        rand::thread_rng().fill_bytes(&mut nonce);

        Self::with_nonce(algorithm,
                         username,
                         password,
                         &::base64::encode_config(&nonce, ::base64::URL_SAFE_NO_PAD))
    }

    pub fn with_nonce(algorithm: ScramAlgorithm,
                      username: &str,
                      password: &str,
                      nonce: &str)
                      -> Self {
        ScramClient {
            algorithm: algorithm,
            username: username.to_owned(),
            password: password.to_owned(),
            nonce: nonce.to_owned(),
        }
    }

    fn client_first_message_bare(&self) -> String {
        format!("n={},r={}", sanitize_name(&self.username), self.nonce)
    }

    /// `client-first-message`: the GS2 header plus the bare message.
    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_message_bare())
    }

    /// Validate `server-first-message`, derive the keys and build
    /// `client-final-message`. Nothing is sent if this fails.
    pub fn handle_server_first(&self, message: &str) -> Result<ScramExchange> {
        let attributes = parse_attributes(message);

        if let Some(err) = lookup(&attributes, 'e') {
            bail!(ErrorKind::AuthenticationError(format!("server rejected first message: {}",
                                                         err)));
        }

        let combined_nonce = lookup(&attributes, 'r')
            .ok_or_else(|| auth_error("server first message carries no nonce"))?;
        let salt = lookup(&attributes, 's')
            .ok_or_else(|| auth_error("server first message carries no salt"))?;
        let iterations: u32 = lookup(&attributes, 'i')
            .and_then(|i| i.parse().ok())
            .ok_or_else(|| auth_error("server first message carries no iteration count"))?;

        if !combined_nonce.starts_with(&self.nonce) {
            bail!(ErrorKind::AuthenticationError("Server nonce does not start with client nonce."
                                                     .to_owned()));
        }

        if iterations < MIN_ITERATIONS {
            bail!(ErrorKind::AuthenticationError(format!("iteration count {} below the minimum {}",
                                                         iterations,
                                                         MIN_ITERATIONS)));
        }

        let salt = ::base64::decode(salt)
            .map_err(|_| auth_error("salt is not valid base64"))?;

        let salted_password =
            salted_password(self.algorithm, self.password.as_bytes(), &salt, iterations)?;
        let client_key = hmac(self.algorithm, &salted_password, b"Client Key")?;
        let stored_key = hash(self.algorithm, &client_key);

        let without_proof = format!("c={},r={}", GS2_HEADER_BASE64, combined_nonce);
        let auth_message = format!("{},{},{}",
                                   self.client_first_message_bare(),
                                   message,
                                   without_proof);

        let client_signature = hmac(self.algorithm, &stored_key, auth_message.as_bytes())?;
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(key, signature)| key ^ signature)
            .collect();

        let server_key = hmac(self.algorithm, &salted_password, b"Server Key")?;
        let server_signature = hmac(self.algorithm, &server_key, auth_message.as_bytes())?;

        Ok(ScramExchange {
               final_message: format!("{},p={}",
                                      without_proof,
                                      ::base64::encode(&client_proof)),
               server_signature: ::base64::encode(&server_signature),
           })
    }
}

impl ScramExchange {
    /// Validate `server-final-message` against the expected signature.
    pub fn verify_server_final(&self, message: &str) -> Result<()> {
        let attributes = parse_attributes(message);

        if let Some(err) = lookup(&attributes, 'e') {
            bail!(ErrorKind::AuthenticationError(format!("server rejected proof: {}", err)));
        }

        match lookup(&attributes, 'v') {
            Some(signature) if signature == self.server_signature => Ok(()),
            Some(_) => bail!(ErrorKind::AuthenticationError("server signature mismatch"
                                                                .to_owned())),
            None => bail!(ErrorKind::AuthenticationError("server final message carries no \
                                                          signature"
                                                             .to_owned())),
        }
    }
}

/// `=` and `,` are the attribute syntax; RFC 5802 §5.1 escapes them in
/// names as `=3D` and `=2C`.
fn sanitize_name(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

fn parse_attributes(message: &str) -> Vec<(char, &str)> {
    message
        .split(',')
        .filter_map(|part| {
            let mut chars = part.chars();

            match (chars.next(), chars.next()) {
                (Some(key), Some('=')) => Some((key, &part[2..])),
                _ => None,
            }
        })
        .collect()
}

fn lookup<'a>(attributes: &[(char, &'a str)], key: char) -> Option<&'a str> {
    attributes
        .iter()
        .find(|&&(k, _)| k == key)
        .map(|&(_, v)| v)
}

fn auth_error(reason: &str) -> ::errors::Error {
    ErrorKind::AuthenticationError(reason.to_owned()).into()
}

fn hash(algorithm: ScramAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        ScramAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        ScramAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

fn hmac(algorithm: ScramAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        ScramAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key)
                .map_err(|_| auth_error("invalid hmac key length"))?;

            mac.update(data);

            Ok(mac.finalize().into_bytes().to_vec())
        }
        ScramAlgorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key)
                .map_err(|_| auth_error("invalid hmac key length"))?;

            mac.update(data);

            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

fn salted_password(algorithm: ScramAlgorithm,
                   password: &[u8],
                   salt: &[u8],
                   iterations: u32)
                   -> Result<Vec<u8>> {
    let mut salted = vec![0u8; algorithm.key_len()];

    match algorithm {
            ScramAlgorithm::Sha256 => {
                pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut salted)
            }
            ScramAlgorithm::Sha512 => {
                pbkdf2::<Hmac<Sha512>>(password, salt, iterations, &mut salted)
            }
        }
        .map_err(|_| auth_error("invalid pbkdf2 output length"))?;

    Ok(salted)
}

/// Two SaslAuthenticate round-trips: client-first, then client-final with
/// the proof. A tampered nonce or a server `e=` aborts before the proof
/// is sent.
pub fn authenticate<S>(conn: &KafkaConnection<S>,
                       algorithm: ScramAlgorithm,
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
            let client = ScramClient::new(algorithm, &username, &password);

            let first = SaslAuthenticateRequest {
                auth_bytes: Bytes::from(client.client_first_message().into_bytes()),
            };

            conn.send(first.descriptor()).and_then(move |response| {
                check_auth_response(&response)?;

                let server_first = str::from_utf8(&response.auth_bytes)?.to_owned();
                let exchange = client.handle_server_first(&server_first)?;

                Ok((conn, exchange))
            })
        })
        .and_then(|(conn, exchange)| {
            let request = SaslAuthenticateRequest {
                auth_bytes: Bytes::from(exchange.final_message.clone().into_bytes()),
            };

            conn.send(request.descriptor()).and_then(move |response| {
                check_auth_response(&response)?;

                exchange.verify_server_final(str::from_utf8(&response.auth_bytes)?)
            })
        }))
}

#[cfg(test)]
mod tests {
    use errors::ErrorKind;
    use super::*;

    /// The SCRAM-SHA-256 example exchange from RFC 7677 §3.
    #[test]
    fn test_rfc7677_exchange() {
        let client = ScramClient::with_nonce(ScramAlgorithm::Sha256,
                                             "user",
                                             "pencil",
                                             "rOprNGfwEbeRWgbNEkqO");

        assert_eq!(client.client_first_message(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let exchange = client
            .handle_server_first("r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                                  s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap();

        assert_eq!(exchange.final_message,
                   "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                    p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=");

        exchange
            .verify_server_final("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn test_tampered_server_nonce_aborts() {
        let client = ScramClient::with_nonce(ScramAlgorithm::Sha256,
                                             "user",
                                             "pencil",
                                             "rOprNGfwEbeRWgbNEkqO");

        let err = client
            .handle_server_first("r=somebodyelsesnonce,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap_err();

        match *err.kind() {
            ErrorKind::AuthenticationError(ref reason) => {
                assert_eq!(reason, "Server nonce does not start with client nonce.")
            }
            ref kind => panic!("expected authentication error, got {:?}", kind),
        }
    }

    #[test]
    fn test_low_iteration_count_rejected() {
        let client =
            ScramClient::with_nonce(ScramAlgorithm::Sha256, "user", "pencil", "abc");

        let err = client
            .handle_server_first("r=abcdef,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=1024")
            .unwrap_err();

        match *err.kind() {
            ErrorKind::AuthenticationError(ref reason) => {
                assert!(reason.contains("iteration count"))
            }
            ref kind => panic!("expected authentication error, got {:?}", kind),
        }
    }

    #[test]
    fn test_server_error_attribute_aborts() {
        let client =
            ScramClient::with_nonce(ScramAlgorithm::Sha256, "user", "pencil", "abc");

        let err = client
            .handle_server_first("e=unknown-user")
            .unwrap_err();

        match *err.kind() {
            ErrorKind::AuthenticationError(ref reason) => {
                assert!(reason.contains("unknown-user"))
            }
            ref kind => panic!("expected authentication error, got {:?}", kind),
        }
    }

    #[test]
    fn test_server_signature_mismatch() {
        let client = ScramClient::with_nonce(ScramAlgorithm::Sha256,
                                             "user",
                                             "pencil",
                                             "rOprNGfwEbeRWgbNEkqO");

        let exchange = client
            .handle_server_first("r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                                  s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap();

        assert!(exchange
                    .verify_server_final("v=bm90IHRoZSByaWdodCBzaWduYXR1cmU=")
                    .is_err());
        assert!(exchange.verify_server_final("e=other-error").is_err());
    }

    #[test]
    fn test_name_sanitization() {
        let client = ScramClient::with_nonce(ScramAlgorithm::Sha256,
                                             "us=er,name",
                                             "pencil",
                                             "abc");

        assert_eq!(client.client_first_message(), "n,,n=us=3Der=2Cname,r=abc");
    }

    #[test]
    fn test_mechanism_names() {
        assert_eq!(ScramAlgorithm::Sha256.mechanism(), "SCRAM-SHA-256");
        assert_eq!(ScramAlgorithm::Sha512.mechanism(), "SCRAM-SHA-512");
    }
}
