use std::borrow::Cow;

use bytes::{BufMut, BytesMut};
use byteorder::{BigEndian, ByteOrder};

use nom::{be_i16, be_i32, be_i64};

use uuid::Uuid;

use errors::{ErrorKind, Result, ResponseErrorMap};
use network::ApiDescriptor;
use protocol::{parse_compact_bytes, parse_full, parse_record_set, parse_tagged_fields, parse_uuid,
               ApiKeys, Encodable, ErrorCode, Offset, ParseTag, PartitionId, ProducerId,
               RecordBatch, SessionId, WriteExt};

/// Fetch Request (Version: 17) => MaxWaitMs MinBytes MaxBytes IsolationLevel
///     SessionId SessionEpoch [Topics] [ForgottenTopicsData] RackId
///   Topics => TopicId [Partitions]
///     Partitions => Partition CurrentLeaderEpoch FetchOffset
///                   LastFetchedEpoch LogStartOffset PartitionMaxBytes
///
/// Since v13 topics are addressed by their UUID; names resolve through
/// metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    /// The maximum time in milliseconds to block waiting if insufficient
    /// data is available at the time the request is issued.
    pub max_wait_ms: i32,
    /// The minimum number of bytes that must be available for a response.
    pub min_bytes: i32,
    pub max_bytes: i32,
    /// 0 = read uncommitted, 1 = read committed.
    pub isolation_level: i8,
    pub session_id: SessionId,
    pub session_epoch: i32,
    pub topics: Vec<FetchTopic>,
    pub forgotten_topics: Vec<ForgottenTopic>,
    pub rack_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchTopic {
    pub topic_id: Option<Uuid>,
    pub partitions: Vec<FetchPartition>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchPartition {
    pub partition: PartitionId,
    pub current_leader_epoch: i32,
    /// The offset to begin this fetch from.
    pub fetch_offset: Offset,
    pub last_fetched_epoch: i32,
    pub log_start_offset: Offset,
    /// The maximum bytes to include in the record set for this partition.
    pub partition_max_bytes: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForgottenTopic {
    pub topic_id: Option<Uuid>,
    pub partitions: Vec<PartitionId>,
}

impl Default for FetchRequest {
    fn default() -> Self {
        FetchRequest {
            max_wait_ms: 500,
            min_bytes: 1,
            max_bytes: 52_428_800,
            isolation_level: 0,
            session_id: 0,
            session_epoch: -1,
            topics: Vec::new(),
            forgotten_topics: Vec::new(),
            rack_id: String::new(),
        }
    }
}

impl Encodable for FetchRequest {
    fn encode<T: ByteOrder>(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i32::<T>(self.max_wait_ms);
        dst.put_i32::<T>(self.min_bytes);
        dst.put_i32::<T>(self.max_bytes);
        dst.put_i8(self.isolation_level);
        dst.put_i32::<T>(self.session_id);
        dst.put_i32::<T>(self.session_epoch);
        dst.put_compact_array(Some(&self.topics[..]), false, |buf, topic: &FetchTopic| {
                buf.put_uuid(topic.topic_id);
                buf.put_compact_array(Some(&topic.partitions[..]),
                                      true,
                                      |buf, partition: &FetchPartition| {
                        buf.put_i32::<T>(partition.partition);
                        buf.put_i32::<T>(partition.current_leader_epoch);
                        buf.put_i64::<T>(partition.fetch_offset);
                        buf.put_i32::<T>(partition.last_fetched_epoch);
                        buf.put_i64::<T>(partition.log_start_offset);
                        buf.put_i32::<T>(partition.partition_max_bytes);

                        Ok(())
                    })?;
                buf.put_tagged_fields();

                Ok(())
            })?;
        dst.put_compact_array(Some(&self.forgotten_topics[..]),
                              false,
                              |buf, topic: &ForgottenTopic| {
                buf.put_uuid(topic.topic_id);
                buf.put_compact_array(Some(&topic.partitions[..]), false, |buf, partition| {
                        buf.put_i32::<T>(*partition);

                        Ok(())
                    })?;
                buf.put_tagged_fields();

                Ok(())
            })?;
        dst.put_compact_str(Some(&self.rack_id))?;
        dst.put_tagged_fields();

        Ok(())
    }
}

impl FetchRequest {
    pub fn descriptor(self) -> ApiDescriptor<FetchResponse> {
        ApiDescriptor::new(ApiKeys::Fetch,
                           17,
                           true,
                           true,
                           move |buf| self.encode::<BigEndian>(buf),
                           |body| {
            let response = parse_full(body, parse_fetch_response)?;
            let errors = response.error_map();

            if errors.is_empty() {
                Ok(response)
            } else {
                bail!(ErrorKind::ResponseError(ApiKeys::Fetch.key(),
                                               17,
                                               errors,
                                               Box::new(response)))
            }
        })
    }
}

/// Fetch Response (Version: 17) => ThrottleTimeMs ErrorCode SessionId
///     [Responses]
///   Responses => TopicId [Partitions]
#[derive(Clone, Debug, PartialEq)]
pub struct FetchResponse {
    pub throttle_time_ms: i32,
    pub error_code: ErrorCode,
    pub session_id: SessionId,
    pub responses: Vec<TopicFetchData>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopicFetchData {
    pub topic_id: Option<Uuid>,
    pub partitions: Vec<PartitionFetchData>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PartitionFetchData {
    pub partition_index: PartitionId,
    pub error_code: ErrorCode,
    /// The offset at the end of the log for this partition.
    pub high_watermark: Offset,
    pub last_stable_offset: Offset,
    pub log_start_offset: Offset,
    pub aborted_transactions: Vec<AbortedTransaction>,
    pub preferred_read_replica: i32,
    pub records: Vec<RecordBatch>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AbortedTransaction {
    pub producer_id: ProducerId,
    pub first_offset: Offset,
}

impl FetchResponse {
    pub fn error_map(&self) -> ResponseErrorMap {
        let mut errors = Vec::new();

        if self.error_code != 0 {
            errors.push(("/error_code".to_owned(), self.error_code, None));
        }

        for (i, topic) in self.responses.iter().enumerate() {
            for (j, partition) in topic.partitions.iter().enumerate() {
                if partition.error_code != 0 {
                    errors.push((format!("/responses/{}/partitions/{}", i, j),
                                 partition.error_code,
                                 None));
                }
            }
        }

        errors
    }
}

fn decode_partition_records(records: Option<Cow<[u8]>>) -> Result<Vec<RecordBatch>> {
    match records {
        Some(records) => parse_record_set(&records),
        None => Ok(Vec::new()),
    }
}

named!(pub parse_fetch_response<FetchResponse>,
    parse_tag!(ParseTag::FetchResponse,
        do_parse!(
            throttle_time_ms: be_i32
         >> error_code: be_i16
         >> session_id: be_i32
         >> responses: parse_compact_array!(parse_topic_fetch_data)
         >> parse_tagged_fields
         >> (FetchResponse {
                throttle_time_ms: throttle_time_ms,
                error_code: error_code,
                session_id: session_id,
                responses: responses,
            })
        )
    )
);

named!(parse_topic_fetch_data<TopicFetchData>,
    parse_tag!(ParseTag::FetchTopic,
        do_parse!(
            topic_id: parse_uuid
         >> partitions: parse_compact_array!(parse_partition_fetch_data)
         >> parse_tagged_fields
         >> (TopicFetchData {
                topic_id: topic_id,
                partitions: partitions,
            })
        )
    )
);

named!(parse_partition_fetch_data<PartitionFetchData>,
    parse_tag!(ParseTag::FetchPartition,
        do_parse!(
            partition_index: be_i32
         >> error_code: be_i16
         >> high_watermark: be_i64
         >> last_stable_offset: be_i64
         >> log_start_offset: be_i64
         >> aborted_transactions: parse_compact_array!(parse_aborted_transaction)
         >> preferred_read_replica: be_i32
         >> records: map_res!(parse_compact_bytes, decode_partition_records)
         >> parse_tagged_fields
         >> (PartitionFetchData {
                partition_index: partition_index,
                error_code: error_code,
                high_watermark: high_watermark,
                last_stable_offset: last_stable_offset,
                log_start_offset: log_start_offset,
                aborted_transactions: aborted_transactions,
                preferred_read_replica: preferred_read_replica,
                records: records,
            })
        )
    )
);

named!(parse_aborted_transaction<AbortedTransaction>,
    do_parse!(
        producer_id: be_i64
     >> first_offset: be_i64
     >> parse_tagged_fields
     >> (AbortedTransaction {
            producer_id: producer_id,
            first_offset: first_offset,
        })
    )
);

#[cfg(test)]
mod tests {
    use nom::IResult;

    use errors::ErrorKind;
    use super::*;

    #[test]
    fn test_encode_fetch_request() {
        let req = FetchRequest {
            topics: vec![FetchTopic {
                             topic_id: None,
                             partitions: vec![FetchPartition {
                                                  partition: 0,
                                                  current_leader_epoch: -1,
                                                  fetch_offset: 5,
                                                  last_fetched_epoch: -1,
                                                  log_start_offset: -1,
                                                  partition_max_bytes: 1_048_576,
                                              }],
                         }],
            ..Default::default()
        };

        let mut buf = BytesMut::with_capacity(128);

        req.encode::<BigEndian>(&mut buf).unwrap();

        let mut expected = vec![
            0, 0, 1, 244,       // max_wait_ms
            0, 0, 0, 1,         // min_bytes
            3, 32, 0, 0,        // max_bytes
            0,                  // isolation_level
            0, 0, 0, 0,         // session_id
            255, 255, 255, 255, // session_epoch
            2,                  // topics: 1 entry
        ];
        expected.extend_from_slice(&[0u8; 16]); // null topic_id
        expected.extend_from_slice(&[
            2,                  // partitions: 1 entry
                0, 0, 0, 0,     // partition
                255, 255, 255, 255, // current_leader_epoch
                0, 0, 0, 0, 0, 0, 0, 5, // fetch_offset
                255, 255, 255, 255, // last_fetched_epoch
                255, 255, 255, 255, 255, 255, 255, 255, // log_start_offset
                0, 16, 0, 0,    // partition_max_bytes
                0,              // tagged fields
            0,                  // topic tagged fields
            1,                  // forgotten_topics: empty
            1,                  // rack_id ""
            0,                  // tagged fields
        ]);

        assert_eq!(&buf[..], &expected[..]);
    }

    /// A fetch against an empty partition: empty responses, no error.
    #[test]
    fn test_parse_empty_fetch_response() {
        let data = vec![
            0, 0, 0, 0, // throttle_time_ms
            0, 0,       // error_code
            0, 0, 0, 0, // session_id
            1,          // responses: empty
            0,          // tagged fields
        ];

        assert_eq!(parse_fetch_response(&data[..]),
                   IResult::Done(&b""[..],
                                 FetchResponse {
                                     throttle_time_ms: 0,
                                     error_code: 0,
                                     session_id: 0,
                                     responses: vec![],
                                 }));
    }

    fn partition_error_response_data() -> Vec<u8> {
        let mut data = vec![
            0, 0, 0, 0, // throttle_time_ms
            0, 0,       // error_code
            0, 0, 0, 0, // session_id
            2,          // responses: 1 entry
        ];
        data.extend_from_slice(&[0u8; 16]); // null topic_id
        data.extend_from_slice(&[
            2,              // partitions: 1 entry
                0, 0, 0, 0, // partition_index
                0, 6,       // error_code NOT_LEADER_OR_FOLLOWER
                255, 255, 255, 255, 255, 255, 255, 255, // high_watermark
                255, 255, 255, 255, 255, 255, 255, 255, // last_stable_offset
                255, 255, 255, 255, 255, 255, 255, 255, // log_start_offset
                1,          // aborted_transactions: empty
                255, 255, 255, 255, // preferred_read_replica
                0,          // null records
                0,          // tagged fields
            0,              // topic tagged fields
            0,              // tagged fields
        ]);

        data
    }

    /// A partition-level error surfaces as a response error whose body
    /// still carries the fully decoded structure.
    #[test]
    fn test_partition_error_becomes_response_error() {
        let request: FetchRequest = Default::default();
        let api = request.descriptor();

        let parse = match api.reply {
            ::network::Reply::Response(parse) => parse,
            _ => panic!("fetch must await a response"),
        };

        let err = parse(&partition_error_response_data()[..]).unwrap_err();

        match *err.kind() {
            ErrorKind::ResponseError(api_key, api_version, ref errors, ref body) => {
                assert_eq!(api_key, 1);
                assert_eq!(api_version, 17);
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0], ("/responses/0/partitions/0".to_owned(), 6, None));

                let response = body.as_any()
                    .downcast_ref::<FetchResponse>()
                    .expect("fetch response body");

                assert_eq!(response.responses[0].partitions[0].partition_index, 0);
                assert_eq!(response.responses[0].partitions[0].error_code, 6);
            }
            ref kind => panic!("expected response error, got {:?}", kind),
        }
    }

    #[test]
    fn test_fetch_response_with_records() {
        use bytes::{BigEndian as BytesBigEndian, BytesMut};

        let batch = RecordBatch {
            base_offset: 7,
            base_timestamp: 1_700_000_000_000,
            max_timestamp: 1_700_000_000_000,
            records: vec![::protocol::Record {
                              offset: 7,
                              timestamp: 1_700_000_000_000,
                              key: None,
                              value: Some(::bytes::Bytes::from(&b"payload"[..])),
                              headers: vec![],
                          }],
            ..Default::default()
        };

        let mut records = BytesMut::with_capacity(256);
        batch.encode::<BytesBigEndian>(&mut records).unwrap();

        let mut data = vec![
            0, 0, 0, 0, // throttle_time_ms
            0, 0,       // error_code
            0, 0, 0, 0, // session_id
            2,          // responses: 1 entry
        ];
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(&[
            2,          // partitions: 1 entry
            0, 0, 0, 0, // partition_index
            0, 0,       // error_code
            0, 0, 0, 0, 0, 0, 0, 8, // high_watermark
            0, 0, 0, 0, 0, 0, 0, 8, // last_stable_offset
            0, 0, 0, 0, 0, 0, 0, 0, // log_start_offset
            1,          // aborted_transactions: empty
            255, 255, 255, 255, // preferred_read_replica
        ]);
        data.push(records.len() as u8 + 1); // compact bytes length
        data.extend_from_slice(&records[..]);
        data.extend_from_slice(&[0, 0, 0]); // partition, topic, response tagged fields

        let (rest, response) = parse_fetch_response(&data[..]).unwrap();

        assert!(rest.is_empty());
        assert_eq!(response.responses[0].partitions[0].records, vec![batch]);
    }
}
