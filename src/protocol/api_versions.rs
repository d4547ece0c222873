use bytes::BytesMut;
use byteorder::{BigEndian, ByteOrder};

use nom::{be_i16, be_i32};

use errors::{ErrorKind, Result};
use network::ApiDescriptor;
use protocol::{parse_full, parse_tagged_fields, ApiKey, ApiKeys, ApiVersion, Encodable, ErrorCode,
               ParseTag, WriteExt};

/// ApiVersions Request (Version: 3) => ClientSoftwareName ClientSoftwareVersion
///   ClientSoftwareName => compact_string
///   ClientSoftwareVersion => compact_string
#[derive(Clone, Debug, PartialEq)]
pub struct ApiVersionsRequest {
    pub client_software_name: String,
    pub client_software_version: String,
}

impl Default for ApiVersionsRequest {
    fn default() -> Self {
        ApiVersionsRequest {
            client_software_name: env!("CARGO_PKG_NAME").to_owned(),
            client_software_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

impl Encodable for ApiVersionsRequest {
    fn encode<T: ByteOrder>(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_compact_str(Some(&self.client_software_name))?;
        dst.put_compact_str(Some(&self.client_software_version))?;
        dst.put_tagged_fields();

        Ok(())
    }
}

impl ApiVersionsRequest {
    /// The request header is flexible, but the response header is not:
    /// brokers answer ApiVersions without a header tagged-field block so
    /// that clients can parse it before versions are negotiated.
    pub fn descriptor(self) -> ApiDescriptor<ApiVersionsResponse> {
        ApiDescriptor::new(ApiKeys::ApiVersions,
                           3,
                           true,
                           false,
                           move |buf| self.encode::<BigEndian>(buf),
                           |body| {
            let response = parse_full(body, parse_api_versions_response)?;

            if response.error_code != 0 {
                let errors = vec![("/error_code".to_owned(), response.error_code, None)];

                bail!(ErrorKind::ResponseError(ApiKeys::ApiVersions.key(),
                                               3,
                                               errors,
                                               Box::new(response)));
            }

            Ok(response)
        })
    }
}

/// ApiVersions Response (Version: 3) => ErrorCode [ApiKeys] ThrottleTimeMs
#[derive(Clone, Debug, PartialEq)]
pub struct ApiVersionsResponse {
    pub error_code: ErrorCode,
    /// API versions supported by the broker.
    pub api_keys: Vec<ApiVersionRange>,
    pub throttle_time_ms: i32,
}

/// The version range the broker supports for one API.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiVersionRange {
    pub api_key: ApiKey,
    pub min_version: ApiVersion,
    pub max_version: ApiVersion,
}

impl ApiVersionsResponse {
    pub fn find(&self, api_key: ApiKeys) -> Option<&ApiVersionRange> {
        self.api_keys.iter().find(|v| v.api_key == api_key.key())
    }
}

named!(pub parse_api_versions_response<ApiVersionsResponse>,
    parse_tag!(ParseTag::ApiVersionsResponse,
        do_parse!(
            error_code: be_i16
         >> api_keys: parse_compact_array!(parse_api_version_range)
         >> throttle_time_ms: be_i32
         >> parse_tagged_fields
         >> (ApiVersionsResponse {
                error_code: error_code,
                api_keys: api_keys,
                throttle_time_ms: throttle_time_ms,
            })
        )
    )
);

named!(parse_api_version_range<ApiVersionRange>,
    parse_tag!(ParseTag::ApiVersionRange,
        do_parse!(
            api_key: be_i16
         >> min_version: be_i16
         >> max_version: be_i16
         >> parse_tagged_fields
         >> (ApiVersionRange {
                api_key: api_key,
                min_version: min_version,
                max_version: max_version,
            })
        )
    )
);
