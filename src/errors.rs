use std::any::Any;
use std::fmt;

use protocol::{ApiKey, ApiVersion, CorrelationId, ErrorCode, KafkaCode};

/// Per-field broker errors found inside a decoded response,
/// keyed by a JSON-pointer style path into the response body.
pub type ResponseErrorMap = Vec<(String, ErrorCode, Option<String>)>;

/// A decoded response body attached to a `ResponseError`.
///
/// The body stays inspectable so callers can recover partial results;
/// downcast through `as_any` to the concrete response type.
pub trait ResponseBody: fmt::Debug {
    fn as_any(&self) -> &Any;
}

impl<T> ResponseBody for T
where
    T: Any + fmt::Debug,
{
    fn as_any(&self) -> &Any {
        self
    }
}

error_chain!{
    foreign_links {
        IoError(::std::io::Error);
        ParseError(::nom::ErrorKind);
        TlsError(::native_tls::Error);
        Utf8Error(::std::str::Utf8Error);
    }

    errors {
        /// Socket level failure; fails every outstanding request on the connection.
        NetworkError(reason: String) {
            description("network error")
            display("network error, {}", reason)
        }
        /// The connect timeout elapsed before the socket became ready.
        ConnectTimeout {
            description("connect timed out")
        }
        /// An inbound frame carried a correlation id without a matching in-flight request.
        UnexpectedCorrelationId(correlation_id: CorrelationId) {
            description("unexpected correlation id")
            display("unexpected correlation id {}", correlation_id)
        }
        /// Truncated or corrupt wire data: CRC mismatch, invalid varint, unsupported magic.
        CodecError(reason: &'static str) {
            description("codec error")
            display("codec error, {}", reason)
        }
        /// The broker answered with non-zero error codes inside an otherwise
        /// well-formed response; the decoded body rides along.
        ResponseError(api_key: ApiKey, api_version: ApiVersion, errors: ResponseErrorMap, body: Box<ResponseBody>) {
            description("broker returned errors in response")
            display("api {} v{} returned {} error(s), first {:?}",
                    api_key, api_version, errors.len(), errors.first())
        }
        /// SASL failure: bad credentials, nonce or signature mismatch, invalid token.
        AuthenticationError(reason: String) {
            description("authentication failed")
            display("authentication failed, {}", reason)
        }
        /// Compression codec not compiled into this build.
        UnsupportedCompression(codec: i8) {
            description("unsupported compression codec")
            display("unsupported compression codec {}", codec)
        }
        /// SASL mechanism this client does not implement or the broker does not enable.
        UnsupportedMechanism(mechanism: String) {
            description("unsupported SASL mechanism")
            display("unsupported SASL mechanism `{}`", mechanism)
        }
        /// A write buffer was handed off while a reserved slot was still unpatched.
        UnfinishedWriteBuffer {
            description("write buffer handed off before its reserved slot was patched")
        }
        /// Every broker in a list failed; the individual causes ride along.
        MultipleErrors(errors: Vec<Error>) {
            description("all brokers failed")
            display("all {} broker(s) failed, first: {}",
                    errors.len(),
                    errors.first().map(|err| err.to_string()).unwrap_or_default())
        }
        /// Error code reported by a remote Kafka server.
        KafkaError(code: KafkaCode) {
            description("kafka error")
            display("kafka error, {:?}", code)
        }
        Canceled(reason: &'static str) {
            description("canceled")
            display("canceled, {}", reason)
        }
    }
}

impl Error {
    /// Whether this error tears the connection down (vs failing one request).
    pub fn is_fatal(&self) -> bool {
        match *self.kind() {
            ErrorKind::NetworkError(_) | ErrorKind::ConnectTimeout | ErrorKind::IoError(_) => true,
            _ => false,
        }
    }
}
