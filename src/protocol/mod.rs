use std::mem;
use std::str;
use std::borrow::{Cow, ToOwned};

use bytes::BytesMut;
use byteorder::ByteOrder;

use nom::{self, IResult, be_i16, be_i32};

use errors::Result;

/// Context tag attached to nom parse errors so a failure names the
/// structure that was being decoded.
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(u32)]
pub enum ParseTag {
    String = 0,
    Bytes = 1,
    UnsignedVarInt = 2,
    VarInt = 3,
    VarLong = 4,
    Uuid = 5,
    TaggedFields = 6,
    ResponseHeader = 7,
    RecordBatch = 8,
    Record = 9,
    RecordHeader = 10,
    ApiVersionsResponse = 11,
    ApiVersionRange = 12,
    MetadataResponse = 13,
    BrokerMetadata = 14,
    TopicMetadata = 15,
    PartitionMetadata = 16,
    ProduceResponse = 17,
    ProduceTopic = 18,
    ProducePartition = 19,
    FetchResponse = 20,
    FetchTopic = 21,
    FetchPartition = 22,
    SaslHandshakeResponse = 23,
    SaslAuthenticateResponse = 24,
}

macro_rules! parse_tag {
    ($i:expr, $tag:expr, $submac:ident!( $($args:tt)* )) => (
        add_return_error!($i, ::nom::ErrorKind::Custom($tag as u32), $submac!($($args)*))
    );
    ($i:expr, $tag:expr, $f:expr) => (
        parse_tag!($i, $tag, call!($f))
    );
}

/// Classic array: `i32` count (`-1` = null) then that many elements.
/// Null decodes as an empty sequence, the shape length-checking callers
/// observe either way; encoders keep the distinction (see `WriteExt`).
macro_rules! parse_array {
    ($i:expr, $submac:ident!( $($args:tt)* )) => (
        do_parse!($i,
            n: call!(::nom::be_i32)
         >> items: cond!(n > 0, count!($submac!($($args)*), n as usize))
         >> (items.unwrap_or_default())
        )
    );
    ($i:expr, $f:expr) => (
        parse_array!($i, call!($f))
    );
}

/// Compact array: unsigned varint count biased by one (`0` = null).
macro_rules! parse_compact_array {
    ($i:expr, $submac:ident!( $($args:tt)* )) => (
        do_parse!($i,
            n: call!($crate::protocol::parse_unsigned_varint)
         >> items: cond!(n > 1, count!($submac!($($args)*), (n - 1) as usize))
         >> (items.unwrap_or_default())
        )
    );
    ($i:expr, $f:expr) => (
        parse_compact_array!($i, call!($f))
    );
}

mod encode;
mod parse;
mod header;
mod record;
mod api_versions;
mod metadata;
mod produce;
mod fetch;
mod sasl;

pub use self::encode::{WriteExt, prepend_length};
pub use self::parse::{parse_compact_bytes, parse_compact_str, parse_compact_string,
                      parse_tagged_fields, parse_unsigned_varint, parse_uuid, parse_varint,
                      parse_varlong, TaggedFields};
pub use self::header::{RequestHeader, ResponseHeader, parse_response_header};
pub use self::record::{Record, RecordBatch, RecordHeader, parse_record_set,
                       TIMESTAMP_TYPE_MASK, COMPRESSION_CODEC_MASK, TRANSACTIONAL_MASK,
                       CONTROL_MASK};
pub use self::api_versions::{ApiVersionRange, ApiVersionsRequest, ApiVersionsResponse};
pub use self::metadata::{BrokerMetadata, MetadataRequest, MetadataRequestTopic, MetadataResponse,
                         PartitionMetadata, TopicMetadata};
pub use self::produce::{ProducePartitionData, ProduceRequest, ProduceResponse, ProduceTopicData,
                        PartitionProduceResponse, RecordError, TopicProduceResponse};
pub use self::fetch::{AbortedTransaction, FetchPartition, FetchRequest, FetchResponse,
                      FetchTopic, ForgottenTopic, PartitionFetchData, TopicFetchData};
pub use self::sasl::{SaslAuthenticateRequest, SaslAuthenticateResponse, SaslHandshakeRequest,
                     SaslHandshakeResponse};

pub type ApiKey = i16;
pub type ApiVersion = i16;
pub type CorrelationId = i32;
pub type ErrorCode = i16;
pub type PartitionId = i32;
pub type NodeId = i32;
pub type Offset = i64;
pub type Timestamp = i64;
pub type ProducerId = i64;
pub type ProducerEpoch = i16;
pub type SessionId = i32;

/// The numeric codes that the ApiKey in the request can take for
/// each request type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i16)]
pub enum ApiKeys {
    Produce = 0,
    Fetch = 1,
    ListOffsets = 2,
    Metadata = 3,
    LeaderAndIsr = 4,
    StopReplica = 5,
    UpdateMetadata = 6,
    ControlledShutdown = 7,
    OffsetCommit = 8,
    OffsetFetch = 9,
    FindCoordinator = 10,
    JoinGroup = 11,
    Heartbeat = 12,
    LeaveGroup = 13,
    SyncGroup = 14,
    DescribeGroups = 15,
    ListGroups = 16,
    SaslHandshake = 17,
    ApiVersions = 18,
    CreateTopics = 19,
    DeleteTopics = 20,
    DeleteRecords = 21,
    InitProducerId = 22,
    OffsetForLeaderEpoch = 23,
    AddPartitionsToTxn = 24,
    AddOffsetsToTxn = 25,
    EndTxn = 26,
    WriteTxnMarkers = 27,
    TxnOffsetCommit = 28,
    DescribeAcls = 29,
    CreateAcls = 30,
    DeleteAcls = 31,
    DescribeConfigs = 32,
    AlterConfigs = 33,
    AlterReplicaLogDirs = 34,
    DescribeLogDirs = 35,
    SaslAuthenticate = 36,
}

impl ApiKeys {
    pub fn key(&self) -> ApiKey {
        *self as ApiKey
    }
}

/// Possible choices on acknowledgement requirements when
/// producing messages to Kafka.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i16)]
pub enum RequiredAcks {
    /// Fire and forget; the broker sends no response at all.
    None = 0,
    /// The partition leader must write the messages to its local log.
    One = 1,
    /// All in-sync replicas must acknowledge the messages.
    All = -1,
}

impl From<i16> for RequiredAcks {
    fn from(v: i16) -> Self {
        unsafe { mem::transmute(v) }
    }
}

/// Error codes a Kafka broker reports inside responses.
///
/// See [Kafka Errors](https://kafka.apache.org/protocol.html#protocol_error_codes)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i16)]
pub enum KafkaCode {
    /// Unexpected server error.
    Unknown = -1,
    None = 0,
    /// The requested offset is outside the range kept for that partition.
    OffsetOutOfRange = 1,
    /// Message contents do not match their CRC.
    CorruptMessage = 2,
    /// The topic or partition does not exist on this broker.
    UnknownTopicOrPartition = 3,
    /// Negative message size.
    InvalidFetchSize = 4,
    /// A leadership election is in progress for this partition.
    LeaderNotAvailable = 5,
    /// The receiving broker is not the leader (or a follower, for
    /// follower fetching) of the partition; client metadata is stale.
    NotLeaderOrFollower = 6,
    /// The request exceeded its user-specified time limit.
    RequestTimedOut = 7,
    /// The broker is not alive.
    BrokerNotAvailable = 8,
    /// A replica is expected on the broker but is not there.
    ReplicaNotAvailable = 9,
    /// The produced message exceeds the broker's maximum message size.
    MessageTooLarge = 10,
    /// Internal broker-to-broker coordination error.
    StaleControllerEpoch = 11,
    /// The offset metadata string exceeds the configured maximum.
    OffsetMetadataTooLarge = 12,
    /// The server disconnected before a response arrived.
    NetworkException = 13,
    /// The coordinator is still loading group state.
    CoordinatorLoadInProgress = 14,
    /// The group/transaction coordinator is not available.
    CoordinatorNotAvailable = 15,
    /// This broker is not the coordinator for the group.
    NotCoordinator = 16,
    /// Illegal topic name or write to an internal topic.
    InvalidTopic = 17,
    /// A batch in the produce request exceeds the segment size.
    RecordListTooLarge = 18,
    /// Too few in-sync replicas for acks=all.
    NotEnoughReplicas = 19,
    /// Written, but with fewer in-sync replicas than required.
    NotEnoughReplicasAfterAppend = 20,
    /// acks was something other than -1, 0 or 1.
    InvalidRequiredAcks = 21,
    /// The supplied group generation is not current.
    IllegalGeneration = 22,
    /// Member protocols are incompatible with the group.
    InconsistentGroupProtocol = 23,
    /// Empty or null group id.
    InvalidGroupId = 24,
    /// The member id is not in the current generation.
    UnknownMemberId = 25,
    /// Session timeout outside the broker's allowed range.
    InvalidSessionTimeout = 26,
    /// The coordinator has begun rebalancing the group.
    RebalanceInProgress = 27,
    /// Oversize offset commit metadata.
    InvalidCommitOffsetSize = 28,
    TopicAuthorizationFailed = 29,
    GroupAuthorizationFailed = 30,
    ClusterAuthorizationFailed = 31,
    /// Message timestamp outside the acceptable range.
    InvalidTimestamp = 32,
    /// The broker does not enable the requested SASL mechanism.
    UnsupportedSaslMechanism = 33,
    /// Request not valid in the current SASL state.
    IllegalSaslState = 34,
    /// The API version is not supported.
    UnsupportedVersion = 35,
    TopicAlreadyExists = 36,
    InvalidPartitions = 37,
    InvalidReplicationFactor = 38,
    InvalidReplicaAssignment = 39,
    InvalidConfig = 40,
    /// This broker is not the controller.
    NotController = 41,
    /// Malformed request, or a request sent to an incompatible broker.
    InvalidRequest = 42,
    /// The broker's message format does not support the request.
    UnsupportedForMessageFormat = 43,
    /// Request parameters violate a configured policy.
    PolicyViolation = 44,
    /// Out-of-order producer sequence number.
    OutOfOrderSequenceNumber = 45,
    /// Duplicate producer sequence number.
    DuplicateSequenceNumber = 46,
    /// The producer was fenced by a newer epoch.
    InvalidProducerEpoch = 47,
    /// Transactional request in an invalid state.
    InvalidTxnState = 48,
    /// Producer id not mapped to the transactional id.
    InvalidProducerIdMapping = 49,
    /// Transaction timeout above the broker maximum.
    InvalidTransactionTimeout = 50,
    /// The producer attempted to update a transaction while another is ongoing.
    ConcurrentTransactions = 51,
    /// The transaction coordinator was fenced.
    TransactionCoordinatorFenced = 52,
    TransactionalIdAuthorizationFailed = 53,
    SecurityDisabled = 54,
    OperationNotAttempted = 55,
    /// Disk error while handling the request.
    KafkaStorageError = 56,
    LogDirNotFound = 57,
    SaslAuthenticationFailed = 58,
    /// The producer id is unknown to the broker.
    UnknownProducerId = 59,
    ReassignmentInProgress = 60,
    DelegationTokenAuthDisabled = 61,
    DelegationTokenNotFound = 62,
    DelegationTokenOwnerMismatch = 63,
    DelegationTokenRequestNotAllowed = 64,
    DelegationTokenAuthorizationFailed = 65,
    DelegationTokenExpired = 66,
    InvalidPrincipalType = 67,
    NonEmptyGroup = 68,
    GroupIdNotFound = 69,
    FetchSessionIdNotFound = 70,
    InvalidFetchSessionEpoch = 71,
    ListenerNotFound = 72,
    TopicDeletionDisabled = 73,
    FencedLeaderEpoch = 74,
    UnknownLeaderEpoch = 75,
    /// The requested compression type is not enabled on the broker.
    UnsupportedCompressionType = 76,
}

impl From<ErrorCode> for KafkaCode {
    fn from(v: ErrorCode) -> Self {
        if v < -1 || v > 76 {
            KafkaCode::Unknown
        } else {
            unsafe { mem::transmute(v) }
        }
    }
}

/// A request or response structure that knows how to write itself.
pub trait Encodable {
    fn encode<T: ByteOrder>(&self, dst: &mut BytesMut) -> Result<()>;
}

named!(pub parse_str<Option<Cow<str>>>,
    parse_tag!(ParseTag::String,
        do_parse!(
            len: be_i16
         >> s: cond!(len >= 0, map!(map_res!(take!(len as usize), str::from_utf8), Cow::from))
         >> (s)
        )
    )
);

named!(pub parse_string<String>,
    parse_tag!(ParseTag::String,
        do_parse!(
            len: be_i16
         >> s: cond_reduce!(len >= 0, map!(map_res!(take!(len as usize), str::from_utf8), ToOwned::to_owned))
         >> (s)
        )
    )
);

named!(pub parse_bytes<Option<Cow<[u8]>>>,
    parse_tag!(ParseTag::Bytes,
        do_parse!(
            len: be_i32
         >> s: cond!(len >= 0, map!(take!(len as usize), Cow::from))
         >> (s)
        )
    )
);

/// Run a nom parser over a complete frame body, translating the
/// nom outcome into this crate's error taxonomy.
pub fn parse_full<O, F>(input: &[u8], parser: F) -> Result<O>
where
    F: Fn(&[u8]) -> IResult<&[u8], O>,
{
    match parser(input) {
        IResult::Done(remaining, output) => {
            if !remaining.is_empty() {
                trace!("{} bytes left over after parse", remaining.len());
            }

            Ok(output)
        }
        IResult::Incomplete(needed) => {
            trace!("truncated data, need {:?} more", needed);

            bail!(::errors::ErrorKind::CodecError("truncated data"))
        }
        IResult::Error(err) => Err(::errors::ErrorKind::ParseError(err.into_error_kind()).into()),
    }
}
