use bytes::{BufMut, BytesMut};
use byteorder::{BigEndian, ByteOrder};

use nom::{be_i16, be_i32, be_i64};

use errors::{ErrorKind, Result, ResponseErrorMap};
use network::ApiDescriptor;
use protocol::{parse_compact_str, parse_compact_string, parse_full, parse_tagged_fields, ApiKeys,
               Encodable, ErrorCode, Offset, ParseTag, PartitionId, RecordBatch, RequiredAcks,
               Timestamp, WriteExt};

/// Produce Request (Version: 11) => TransactionalId Acks TimeoutMs [TopicData]
///   TransactionalId => compact_nullable_string
///   Acks => int16
///   TimeoutMs => int32
///   TopicData => Name [PartitionData]
///     PartitionData => Index Records
#[derive(Clone, Debug, PartialEq)]
pub struct ProduceRequest {
    pub transactional_id: Option<String>,
    pub required_acks: RequiredAcks,
    pub timeout_ms: i32,
    pub topics: Vec<ProduceTopicData>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProduceTopicData {
    pub topic_name: String,
    pub partitions: Vec<ProducePartitionData>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProducePartitionData {
    pub partition: PartitionId,
    pub batch: RecordBatch,
}

impl Encodable for ProduceRequest {
    fn encode<T: ByteOrder>(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_compact_str(self.transactional_id.as_ref())?;
        dst.put_i16::<T>(self.required_acks as i16);
        dst.put_i32::<T>(self.timeout_ms);
        dst.put_compact_array(Some(&self.topics[..]), false, |buf, topic: &ProduceTopicData| {
                buf.put_compact_str(Some(&topic.topic_name))?;
                buf.put_compact_array(Some(&topic.partitions[..]),
                                      false,
                                      |buf, partition: &ProducePartitionData| {
                        buf.put_i32::<T>(partition.partition);

                        let mut records = BytesMut::with_capacity(256);
                        partition.batch.encode::<T>(&mut records)?;

                        buf.put_compact_bytes(Some(&records[..]))?;
                        buf.put_tagged_fields();

                        Ok(())
                    })?;
                buf.put_tagged_fields();

                Ok(())
            })?;
        dst.put_tagged_fields();

        Ok(())
    }
}

impl ProduceRequest {
    pub fn descriptor(self) -> ApiDescriptor<ProduceResponse> {
        ApiDescriptor::new(ApiKeys::Produce,
                           11,
                           true,
                           true,
                           move |buf| self.encode::<BigEndian>(buf),
                           |body| {
            let response = parse_full(body, parse_produce_response)?;
            let errors = response.error_map();

            if errors.is_empty() {
                Ok(response)
            } else {
                bail!(ErrorKind::ResponseError(ApiKeys::Produce.key(),
                                               11,
                                               errors,
                                               Box::new(response)))
            }
        })
    }

    /// With acks=0 the broker never answers: the request takes no
    /// in-flight slot and completes, with the "socket can accept more"
    /// flag, as soon as its bytes are handed to the socket.
    pub fn fire_and_forget(self) -> ApiDescriptor<bool> {
        ApiDescriptor::fire_and_forget(ApiKeys::Produce,
                                       11,
                                       true,
                                       move |buf| self.encode::<BigEndian>(buf),
                                       |more| more)
    }
}

/// Produce Response (Version: 11) => [Responses] ThrottleTimeMs
#[derive(Clone, Debug, PartialEq)]
pub struct ProduceResponse {
    pub responses: Vec<TopicProduceResponse>,
    pub throttle_time_ms: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopicProduceResponse {
    pub topic_name: String,
    pub partitions: Vec<PartitionProduceResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PartitionProduceResponse {
    pub partition: PartitionId,
    pub error_code: ErrorCode,
    pub base_offset: Offset,
    pub log_append_time_ms: Timestamp,
    pub log_start_offset: Offset,
    pub record_errors: Vec<RecordError>,
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordError {
    pub batch_index: i32,
    pub message: Option<String>,
}

impl ProduceResponse {
    pub fn error_map(&self) -> ResponseErrorMap {
        let mut errors = Vec::new();

        for (i, topic) in self.responses.iter().enumerate() {
            for (j, partition) in topic.partitions.iter().enumerate() {
                if partition.error_code != 0 {
                    errors.push((format!("/responses/{}/partitions/{}", i, j),
                                 partition.error_code,
                                 partition.error_message.clone()));
                }
            }
        }

        errors
    }
}

named!(pub parse_produce_response<ProduceResponse>,
    parse_tag!(ParseTag::ProduceResponse,
        do_parse!(
            responses: parse_compact_array!(parse_topic_produce_response)
         >> throttle_time_ms: be_i32
         >> parse_tagged_fields
         >> (ProduceResponse {
                responses: responses,
                throttle_time_ms: throttle_time_ms,
            })
        )
    )
);

named!(parse_topic_produce_response<TopicProduceResponse>,
    parse_tag!(ParseTag::ProduceTopic,
        do_parse!(
            topic_name: parse_compact_string
         >> partitions: parse_compact_array!(parse_partition_produce_response)
         >> parse_tagged_fields
         >> (TopicProduceResponse {
                topic_name: topic_name,
                partitions: partitions,
            })
        )
    )
);

named!(parse_partition_produce_response<PartitionProduceResponse>,
    parse_tag!(ParseTag::ProducePartition,
        do_parse!(
            partition: be_i32
         >> error_code: be_i16
         >> base_offset: be_i64
         >> log_append_time_ms: be_i64
         >> log_start_offset: be_i64
         >> record_errors: parse_compact_array!(parse_record_error)
         >> error_message: parse_compact_str
         >> parse_tagged_fields
         >> (PartitionProduceResponse {
                partition: partition,
                error_code: error_code,
                base_offset: base_offset,
                log_append_time_ms: log_append_time_ms,
                log_start_offset: log_start_offset,
                record_errors: record_errors,
                error_message: error_message.map(|s| s.into_owned()),
            })
        )
    )
);

named!(parse_record_error<RecordError>,
    do_parse!(
        batch_index: be_i32
     >> message: parse_compact_str
     >> parse_tagged_fields
     >> (RecordError {
            batch_index: batch_index,
            message: message.map(|s| s.into_owned()),
        })
    )
);

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use nom::IResult;

    use protocol::Record;
    use super::*;

    /// One-record produce request for topic "t", partition 0,
    /// key "k", value "v", fixed timestamp.
    fn sample_request() -> ProduceRequest {
        ProduceRequest {
            transactional_id: None,
            required_acks: RequiredAcks::One,
            timeout_ms: 0,
            topics: vec![ProduceTopicData {
                             topic_name: "t".to_owned(),
                             partitions: vec![ProducePartitionData {
                                                  partition: 0,
                                                  batch: RecordBatch {
                                                      base_timestamp: 1_700_000_000_000,
                                                      max_timestamp: 1_700_000_000_000,
                                                      records: vec![Record {
                                                          offset: 0,
                                                          timestamp: 1_700_000_000_000,
                                                          key: Some(Bytes::from(&b"k"[..])),
                                                          value: Some(Bytes::from(&b"v"[..])),
                                                          headers: vec![],
                                                      }],
                                                      ..Default::default()
                                                  },
                                              }],
                         }],
        }
    }

    #[test]
    fn test_encode_produce_request() {
        let req = sample_request();

        let mut buf = BytesMut::with_capacity(256);

        req.encode::<BigEndian>(&mut buf).unwrap();

        // null transactional id, acks=1, timeout=0
        assert_eq!(&buf[..7], &[0, 0, 1, 0, 0, 0, 0][..]);
        // one topic, name "t"
        assert_eq!(&buf[7..10], &[2, 2, 116][..]);
        // one partition, index 0
        assert_eq!(&buf[10..15], &[2, 0, 0, 0, 0][..]);

        // the records field is a compact-bytes wrapper around the batch
        let (rest, records) = ::protocol::parse_compact_bytes(&buf[15..]).unwrap();
        let records = records.unwrap();

        // partition, topic and request tagged-field blocks remain
        assert_eq!(rest, &[0, 0, 0][..]);

        // the wrapped batch decodes back to what was sent
        let (batch, leftover) = RecordBatch::parse(&records[..]).unwrap();

        assert!(leftover.is_empty());
        assert_eq!(batch.base_timestamp, 1_700_000_000_000);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].key, Some(Bytes::from(&b"k"[..])));
        assert_eq!(batch.records[0].value, Some(Bytes::from(&b"v"[..])));

        // batch invariants pinned by the wire format
        assert_eq!(records[16] as i8, 2); // magic
        assert_eq!(::byteorder::BigEndian::read_i16(&records[21..]), 0); // attributes
        assert_eq!(::byteorder::BigEndian::read_i32(&records[23..]), 0); // last offset delta
        assert_eq!(::byteorder::BigEndian::read_i64(&records[27..]),
                   1_700_000_000_000); // first timestamp
        assert_eq!(::byteorder::BigEndian::read_u32(&records[17..]),
                   ::crc::crc32::checksum_castagnoli(&records[21..])); // crc

        // key "k" and value "v" as varint-prefixed bytes
        let tail = &records[61..];
        let key_pos = tail.iter().position(|&b| b == 0x6B).expect("key byte");
        assert_eq!(tail[key_pos - 1], 0x02); // varint length 1
        assert_eq!(tail[key_pos + 1], 0x02);
        assert_eq!(tail[key_pos + 2], 0x76);
    }

    #[test]
    fn test_fire_and_forget_descriptor() {
        let mut req = sample_request();
        req.required_acks = RequiredAcks::None;

        let api = req.fire_and_forget();

        assert_eq!(api.api_key, ApiKeys::Produce);
        assert!(api.no_response());
    }

    #[test]
    fn test_parse_produce_response() {
        let data = vec![
            2,              // responses: 1 entry
                2, 116,     // topic "t"
                2,          // partitions: 1 entry
                    0, 0, 0, 0, // partition
                    0, 0,       // error_code
                    0, 0, 0, 0, 0, 0, 0, 42, // base_offset
                    255, 255, 255, 255, 255, 255, 255, 255, // log_append_time_ms (-1)
                    0, 0, 0, 0, 0, 0, 0, 0, // log_start_offset
                    1,          // record_errors: empty
                    0,          // null error_message
                    0,          // tagged fields
                0,          // tagged fields
            0, 0, 0, 0,     // throttle_time_ms
            0,              // tagged fields
        ];

        let expected = ProduceResponse {
            responses: vec![TopicProduceResponse {
                                topic_name: "t".to_owned(),
                                partitions: vec![PartitionProduceResponse {
                                                     partition: 0,
                                                     error_code: 0,
                                                     base_offset: 42,
                                                     log_append_time_ms: -1,
                                                     log_start_offset: 0,
                                                     record_errors: vec![],
                                                     error_message: None,
                                                 }],
                            }],
            throttle_time_ms: 0,
        };

        assert_eq!(parse_produce_response(&data[..]),
                   IResult::Done(&b""[..], expected.clone()));
        assert!(expected.error_map().is_empty());
    }

    #[test]
    fn test_produce_response_error_map() {
        let response = ProduceResponse {
            responses: vec![TopicProduceResponse {
                                topic_name: "t".to_owned(),
                                partitions: vec![PartitionProduceResponse {
                                                     partition: 0,
                                                     error_code: 6,
                                                     base_offset: -1,
                                                     log_append_time_ms: -1,
                                                     log_start_offset: -1,
                                                     record_errors: vec![],
                                                     error_message: None,
                                                 }],
                            }],
            throttle_time_ms: 0,
        };

        assert_eq!(response.error_map(),
                   vec![("/responses/0/partitions/0".to_owned(), 6, None)]);
    }
}
