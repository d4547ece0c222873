use std::borrow::Cow;

use bytes::BytesMut;
use byteorder::ByteOrder;

use nom::be_i32;

use errors::Result;
use protocol::{parse_tagged_fields, ApiKey, ApiVersion, CorrelationId, Encodable, ParseTag,
               WriteExt};

/// Request header:
///
/// RequestHeader => ApiKey ApiVersion CorrelationId ClientId [TaggedFields]
///   ApiKey => int16
///   ApiVersion => int16
///   CorrelationId => int32
///   ClientId => nullable_string
///
/// The client id stays a classic nullable string in every version; only
/// the trailing tagged-field block depends on whether the API reports a
/// flexible request header.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestHeader<'a> {
    pub api_key: ApiKey,
    pub api_version: ApiVersion,
    pub correlation_id: CorrelationId,
    pub client_id: Option<Cow<'a, str>>,
    /// Emit the empty tagged-field block after the client id.
    pub flexible: bool,
}

impl<'a> Encodable for RequestHeader<'a> {
    fn encode<T: ByteOrder>(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i16::<T>(self.api_key);
        dst.put_i16::<T>(self.api_version);
        dst.put_i32::<T>(self.correlation_id);
        dst.put_str::<T, _>(self.client_id.as_ref())?;

        if self.flexible {
            dst.put_tagged_fields();
        }

        Ok(())
    }
}

/// Response header: the correlation id, optionally followed by a
/// tagged-field block. Kafka is inconsistent about the block (ApiVersions
/// responses never carry it), so the caller passes the flag per API.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseHeader {
    pub correlation_id: CorrelationId,
}

named_args!(pub parse_response_header(flexible: bool)<ResponseHeader>,
    parse_tag!(ParseTag::ResponseHeader,
        do_parse!(
            correlation_id: be_i32
         >> cond!(flexible, parse_tagged_fields)
         >> (ResponseHeader {
                correlation_id: correlation_id,
            })
        )
    )
);

#[cfg(test)]
mod tests {
    use bytes::BigEndian;

    use nom::IResult;

    use super::*;

    #[test]
    fn test_encode_classic_header() {
        let header = RequestHeader {
            api_key: 18,
            api_version: 0,
            correlation_id: 123,
            client_id: Some("client".into()),
            flexible: false,
        };

        let mut buf = BytesMut::with_capacity(64);

        header.encode::<BigEndian>(&mut buf).unwrap();

        assert_eq!(&buf[..],
                   &[0, 18, // api_key
                     0, 0, // api_version
                     0, 0, 0, 123, // correlation_id
                     0, 6, 99, 108, 105, 101, 110, 116 /* client_id */][..]);
    }

    #[test]
    fn test_encode_flexible_header() {
        let header = RequestHeader {
            api_key: 3,
            api_version: 12,
            correlation_id: 1,
            client_id: None,
            flexible: true,
        };

        let mut buf = BytesMut::with_capacity(64);

        header.encode::<BigEndian>(&mut buf).unwrap();

        assert_eq!(&buf[..],
                   &[0, 3, // api_key
                     0, 12, // api_version
                     0, 0, 0, 1, // correlation_id
                     255, 255, // null client_id
                     0 /* empty tagged fields */][..]);
    }

    #[test]
    fn test_parse_response_header() {
        assert_eq!(parse_response_header(&[0, 0, 0, 123][..], false),
                   IResult::Done(&b""[..], ResponseHeader { correlation_id: 123 }));

        // flexible response headers consume the tagged-field block
        assert_eq!(parse_response_header(&[0, 0, 0, 123, 0, 0xAB][..], true),
                   IResult::Done(&[0xAB][..], ResponseHeader { correlation_id: 123 }));
    }
}
