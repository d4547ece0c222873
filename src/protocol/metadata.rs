use bytes::{BufMut, BytesMut};
use byteorder::{BigEndian, ByteOrder};

use nom::{be_i16, be_i32, be_u8};

use uuid::Uuid;

use errors::{ErrorKind, Result, ResponseErrorMap};
use network::ApiDescriptor;
use protocol::{parse_compact_str, parse_full, parse_tagged_fields, parse_uuid, ApiKeys, Encodable,
               ErrorCode, NodeId, ParseTag, PartitionId, WriteExt};

/// Metadata Request (Version: 12) => [Topics] AllowAutoTopicCreation
///                                   IncludeTopicAuthorizedOperations
///   Topics => TopicId Name
///
/// A null topic list asks for every topic; an empty list for none.
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataRequest {
    pub topics: Option<Vec<MetadataRequestTopic>>,
    pub allow_auto_topic_creation: bool,
    pub include_topic_authorized_operations: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetadataRequestTopic {
    pub topic_id: Option<Uuid>,
    pub name: Option<String>,
}

impl MetadataRequest {
    pub fn all_topics() -> Self {
        MetadataRequest {
            topics: None,
            allow_auto_topic_creation: false,
            include_topic_authorized_operations: false,
        }
    }

    pub fn with_topic_names<I, S>(names: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        MetadataRequest {
            topics: Some(names.into_iter()
                             .map(|name| {
                                      MetadataRequestTopic {
                                          topic_id: None,
                                          name: Some(name.into()),
                                      }
                                  })
                             .collect()),
            allow_auto_topic_creation: false,
            include_topic_authorized_operations: false,
        }
    }

    pub fn descriptor(self) -> ApiDescriptor<MetadataResponse> {
        ApiDescriptor::new(ApiKeys::Metadata,
                           12,
                           true,
                           true,
                           move |buf| self.encode::<BigEndian>(buf),
                           |body| {
            let response = parse_full(body, parse_metadata_response)?;
            let errors = response.error_map();

            if errors.is_empty() {
                Ok(response)
            } else {
                bail!(ErrorKind::ResponseError(ApiKeys::Metadata.key(),
                                               12,
                                               errors,
                                               Box::new(response)))
            }
        })
    }
}

impl Encodable for MetadataRequest {
    fn encode<T: ByteOrder>(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_compact_array(self.topics.as_ref().map(|topics| &topics[..]),
                              false,
                              |buf, topic: &MetadataRequestTopic| {
                buf.put_uuid(topic.topic_id);
                buf.put_compact_str(topic.name.as_ref())?;
                buf.put_tagged_fields();

                Ok(())
            })?;
        dst.put_u8(self.allow_auto_topic_creation as u8);
        dst.put_u8(self.include_topic_authorized_operations as u8);
        dst.put_tagged_fields();

        Ok(())
    }
}

/// Metadata Response (Version: 12) => ThrottleTimeMs [Brokers] ClusterId
///                                    ControllerId [Topics]
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataResponse {
    pub throttle_time_ms: i32,
    pub brokers: Vec<BrokerMetadata>,
    pub cluster_id: Option<String>,
    pub controller_id: NodeId,
    pub topics: Vec<TopicMetadata>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BrokerMetadata {
    pub node_id: NodeId,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopicMetadata {
    pub error_code: ErrorCode,
    pub name: Option<String>,
    pub topic_id: Option<Uuid>,
    pub is_internal: bool,
    pub partitions: Vec<PartitionMetadata>,
    pub topic_authorized_operations: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PartitionMetadata {
    pub error_code: ErrorCode,
    pub partition_index: PartitionId,
    pub leader_id: NodeId,
    pub leader_epoch: i32,
    pub replica_nodes: Vec<NodeId>,
    pub isr_nodes: Vec<NodeId>,
    pub offline_replicas: Vec<NodeId>,
}

impl MetadataResponse {
    /// Every non-zero error code in the body, keyed by its path.
    pub fn error_map(&self) -> ResponseErrorMap {
        let mut errors = Vec::new();

        for (i, topic) in self.topics.iter().enumerate() {
            if topic.error_code != 0 {
                errors.push((format!("/topics/{}", i), topic.error_code, None));
            }

            for (j, partition) in topic.partitions.iter().enumerate() {
                if partition.error_code != 0 {
                    errors.push((format!("/topics/{}/partitions/{}", i, j),
                                 partition.error_code,
                                 None));
                }
            }
        }

        errors
    }
}

named!(pub parse_metadata_response<MetadataResponse>,
    parse_tag!(ParseTag::MetadataResponse,
        do_parse!(
            throttle_time_ms: be_i32
         >> brokers: parse_compact_array!(parse_broker_metadata)
         >> cluster_id: parse_compact_str
         >> controller_id: be_i32
         >> topics: parse_compact_array!(parse_topic_metadata)
         >> parse_tagged_fields
         >> (MetadataResponse {
                throttle_time_ms: throttle_time_ms,
                brokers: brokers,
                cluster_id: cluster_id.map(|s| s.into_owned()),
                controller_id: controller_id,
                topics: topics,
            })
        )
    )
);

named!(parse_broker_metadata<BrokerMetadata>,
    parse_tag!(ParseTag::BrokerMetadata,
        do_parse!(
            node_id: be_i32
         >> host: map!(parse_compact_str, |s: Option<::std::borrow::Cow<str>>|
                s.map(|s| s.into_owned()).unwrap_or_default())
         >> port: be_i32
         >> rack: parse_compact_str
         >> parse_tagged_fields
         >> (BrokerMetadata {
                node_id: node_id,
                host: host,
                port: port,
                rack: rack.map(|s| s.into_owned()),
            })
        )
    )
);

named!(parse_topic_metadata<TopicMetadata>,
    parse_tag!(ParseTag::TopicMetadata,
        do_parse!(
            error_code: be_i16
         >> name: parse_compact_str
         >> topic_id: parse_uuid
         >> is_internal: map!(be_u8, |b| b != 0)
         >> partitions: parse_compact_array!(parse_partition_metadata)
         >> topic_authorized_operations: be_i32
         >> parse_tagged_fields
         >> (TopicMetadata {
                error_code: error_code,
                name: name.map(|s| s.into_owned()),
                topic_id: topic_id,
                is_internal: is_internal,
                partitions: partitions,
                topic_authorized_operations: topic_authorized_operations,
            })
        )
    )
);

named!(parse_partition_metadata<PartitionMetadata>,
    parse_tag!(ParseTag::PartitionMetadata,
        do_parse!(
            error_code: be_i16
         >> partition_index: be_i32
         >> leader_id: be_i32
         >> leader_epoch: be_i32
         >> replica_nodes: parse_compact_array!(be_i32)
         >> isr_nodes: parse_compact_array!(be_i32)
         >> offline_replicas: parse_compact_array!(be_i32)
         >> parse_tagged_fields
         >> (PartitionMetadata {
                error_code: error_code,
                partition_index: partition_index,
                leader_id: leader_id,
                leader_epoch: leader_epoch,
                replica_nodes: replica_nodes,
                isr_nodes: isr_nodes,
                offline_replicas: offline_replicas,
            })
        )
    )
);
