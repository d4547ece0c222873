use bytes::{Bytes, BytesMut};
use byteorder::{BigEndian, ByteOrder};

use nom::{be_i16, be_i64};

use errors::Result;
use network::ApiDescriptor;
use protocol::{parse_compact_bytes, parse_compact_str, parse_full, parse_string,
               parse_tagged_fields, ApiKeys, Encodable, ErrorCode, ParseTag, WriteExt};

/// SaslHandshake Request (Version: 1) => Mechanism
///   Mechanism => string
///
/// Still a classic (non-flexible) API; v1 switches the follow-up token
/// exchange to SaslAuthenticate frames instead of opaque packets.
#[derive(Clone, Debug, PartialEq)]
pub struct SaslHandshakeRequest {
    pub mechanism: String,
}

impl Encodable for SaslHandshakeRequest {
    fn encode<T: ByteOrder>(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_str::<T, _>(Some(&self.mechanism))
    }
}

impl SaslHandshakeRequest {
    /// The SASL layer inspects the error code itself (it needs the
    /// enabled-mechanisms list for its message), so the parser returns
    /// the response as decoded.
    pub fn descriptor(self) -> ApiDescriptor<SaslHandshakeResponse> {
        ApiDescriptor::new(ApiKeys::SaslHandshake,
                           1,
                           false,
                           false,
                           move |buf| self.encode::<BigEndian>(buf),
                           |body| parse_full(body, parse_sasl_handshake_response))
    }
}

/// SaslHandshake Response (Version: 1) => ErrorCode [Mechanism]
#[derive(Clone, Debug, PartialEq)]
pub struct SaslHandshakeResponse {
    pub error_code: ErrorCode,
    /// The mechanisms enabled on the broker.
    pub mechanisms: Vec<String>,
}

named!(pub parse_sasl_handshake_response<SaslHandshakeResponse>,
    parse_tag!(ParseTag::SaslHandshakeResponse,
        do_parse!(
            error_code: be_i16
         >> mechanisms: parse_array!(parse_string)
         >> (SaslHandshakeResponse {
                error_code: error_code,
                mechanisms: mechanisms,
            })
        )
    )
);

/// SaslAuthenticate Request (Version: 2) => AuthBytes
///   AuthBytes => compact_bytes
#[derive(Clone, Debug, PartialEq)]
pub struct SaslAuthenticateRequest {
    pub auth_bytes: Bytes,
}

impl Encodable for SaslAuthenticateRequest {
    fn encode<T: ByteOrder>(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_compact_bytes(Some(&self.auth_bytes))?;
        dst.put_tagged_fields();

        Ok(())
    }
}

impl SaslAuthenticateRequest {
    pub fn descriptor(self) -> ApiDescriptor<SaslAuthenticateResponse> {
        ApiDescriptor::new(ApiKeys::SaslAuthenticate,
                           2,
                           true,
                           true,
                           move |buf| self.encode::<BigEndian>(buf),
                           |body| parse_full(body, parse_sasl_authenticate_response))
    }
}

/// SaslAuthenticate Response (Version: 2) =>
///     ErrorCode ErrorMessage AuthBytes SessionLifetimeMs
#[derive(Clone, Debug, PartialEq)]
pub struct SaslAuthenticateResponse {
    pub error_code: ErrorCode,
    pub error_message: Option<String>,
    /// The server's challenge or final token for the mechanism.
    pub auth_bytes: Bytes,
    pub session_lifetime_ms: i64,
}

named!(pub parse_sasl_authenticate_response<SaslAuthenticateResponse>,
    parse_tag!(ParseTag::SaslAuthenticateResponse,
        do_parse!(
            error_code: be_i16
         >> error_message: parse_compact_str
         >> auth_bytes: parse_compact_bytes
         >> session_lifetime_ms: be_i64
         >> parse_tagged_fields
         >> (SaslAuthenticateResponse {
                error_code: error_code,
                error_message: error_message.map(|s| s.into_owned()),
                auth_bytes: auth_bytes.map(|d| Bytes::from(d.into_owned())).unwrap_or_default(),
                session_lifetime_ms: session_lifetime_ms,
            })
        )
    )
);
