//! The connection core of a Kafka wire-protocol client.
//!
//! One `KafkaConnection` multiplexes many concurrent requests over a
//! single TCP or TLS socket, correlating responses by id and honoring
//! socket back-pressure. The `protocol` layer carries the binary codec
//! (fixed big-endian integers, zig-zag and unsigned varints, classic and
//! compact strings/arrays, tagged fields, v2 record batches with CRC32-C
//! and optional compression), and the `sasl` layer stacks the PLAIN,
//! SCRAM-SHA-256/512 and OAUTHBEARER state machines on top.

#![recursion_limit = "256"]

#![cfg_attr(feature = "clippy", feature(plugin))]
#![cfg_attr(feature = "clippy", plugin(clippy))]

#![allow(dead_code)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
extern crate bytes;
#[macro_use]
extern crate nom;
extern crate byteorder;
extern crate crc;
extern crate time;
extern crate rand;
extern crate hexplay;
extern crate uuid;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
#[macro_use]
extern crate prometheus;
extern crate sha2;
extern crate hmac;
extern crate pbkdf2;
extern crate base64;

#[macro_use]
extern crate futures;
extern crate tokio_core;
extern crate tokio_io;
extern crate tokio_timer;
extern crate tokio_tls;
extern crate native_tls;

#[cfg(feature = "gzip")]
extern crate flate2;
#[cfg(feature = "snappy")]
extern crate snap;
#[cfg(feature = "lz4")]
extern crate lz4_compress;
#[cfg(feature = "zstd-compression")]
extern crate zstd;

#[cfg(test)]
extern crate pretty_env_logger;

pub mod errors;
mod compression;
#[macro_use]
mod protocol;
mod network;
mod sasl;

pub use errors::{Error, ErrorKind, ResponseBody, ResponseErrorMap, Result};
pub use compression::Compression;
pub use protocol::{ApiKeys, ApiVersionsRequest, ApiVersionsResponse, CorrelationId, FetchRequest,
                   FetchResponse, KafkaCode, MetadataRequest, MetadataResponse, Offset,
                   PartitionId, ProduceRequest, ProduceResponse, Record, RecordBatch,
                   RecordHeader, RequiredAcks, Timestamp};
pub use network::{ApiDescriptor, Connecting, ConnectionConfig, ConnectionEvent, ConnectionPool,
                  ConnectionState, GetConnection, GetFirstAvailable, KafkaConnection,
                  KafkaConnector, KafkaStream, NoopTracer, Reply, SendRequest, StaticBoxFuture,
                  TimedRequest, TlsConfig, ToStaticBoxFuture, Tracer,
                  DEFAULT_CONNECT_TIMEOUT_MILLIS, DEFAULT_MAX_INFLIGHT};
pub use sasl::{authenticate, Authenticate, Credential, SaslCredentials, ScramAlgorithm};
