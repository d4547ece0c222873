use std::str;

use bytes::{BufMut, Bytes, BytesMut};
use byteorder::{BigEndian, ByteOrder};

use nom::{self, IResult, be_i8};

use time;

use crc::crc32;

use errors::{ErrorKind, Result};
use compression::Compression;
use protocol::{parse_varint, parse_varlong, Offset, ProducerEpoch, ProducerId, Timestamp,
               WriteExt};

pub const COMPRESSION_CODEC_MASK: i16 = 0x07;
pub const TIMESTAMP_TYPE_MASK: i16 = 0x08;
pub const TRANSACTIONAL_MASK: i16 = 0x10;
pub const CONTROL_MASK: i16 = 0x20;

const MAGIC: i8 = 2;

/// Byte offsets within an encoded batch, relative to the base offset field.
const LENGTH_OFFSET: usize = 8;
const CRC_OFFSET: usize = 17;
const ATTRIBUTES_OFFSET: usize = 21;
const RECORDS_OFFSET: usize = 61;

/// Record batch (v2)
///
/// RecordBatch => BaseOffset BatchLength PartitionLeaderEpoch Magic Crc
///                Attributes LastOffsetDelta BaseTimestamp MaxTimestamp
///                ProducerId ProducerEpoch BaseSequence [Record]
///   BaseOffset => int64
///   BatchLength => int32
///   PartitionLeaderEpoch => int32
///   Magic => int8 (current magic value is 2)
///   Crc => uint32 (CRC32-C of everything from Attributes to the end)
///   Attributes => int16 (compression bits 0-2, timestamp type bit 3,
///                        transactional bit 4, control bit 5)
///   LastOffsetDelta => int32
///   BaseTimestamp => int64
///   MaxTimestamp => int64
///   ProducerId => int64
///   ProducerEpoch => int16
///   BaseSequence => int32
///
/// Records are held with absolute offsets and timestamps; the codec
/// applies and recovers the per-record deltas.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordBatch {
    pub base_offset: Offset,
    pub partition_leader_epoch: i32,
    pub attributes: i16,
    pub base_timestamp: Timestamp,
    pub max_timestamp: Timestamp,
    pub producer_id: ProducerId,
    pub producer_epoch: ProducerEpoch,
    pub base_sequence: i32,
    pub records: Vec<Record>,
}

impl Default for RecordBatch {
    fn default() -> Self {
        RecordBatch {
            base_offset: 0,
            partition_leader_epoch: -1,
            attributes: 0,
            base_timestamp: 0,
            max_timestamp: 0,
            producer_id: -1,
            producer_epoch: -1,
            base_sequence: -1,
            records: Vec::new(),
        }
    }
}

/// Record => Length Attributes TimestampDelta OffsetDelta Key Value [Header]
///   Length => varint
///   Attributes => int8 (unused)
///   TimestampDelta => varlong
///   OffsetDelta => varint
///   Key => varint-prefixed bytes (-1 = null)
///   Value => varint-prefixed bytes (-1 = null)
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub offset: Offset,
    pub timestamp: Timestamp,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
}

impl Record {
    /// A record stamped with the current wall clock.
    pub fn new(offset: Offset, key: Option<Bytes>, value: Option<Bytes>) -> Self {
        let ts = time::now_utc().to_timespec();

        Record {
            offset: offset,
            timestamp: ts.sec * 1000 + i64::from(ts.nsec) / 1_000_000,
            key: key,
            value: value,
            headers: Vec::new(),
        }
    }
}

/// Header => Key Value
///   Key => varint-prefixed string
///   Value => varint-prefixed bytes (-1 = null)
#[derive(Clone, Debug, PartialEq)]
pub struct RecordHeader {
    pub key: String,
    pub value: Option<Bytes>,
}

impl RecordBatch {
    pub fn with_compression(compression: Compression) -> Self {
        RecordBatch {
            attributes: compression as i16 & COMPRESSION_CODEC_MASK,
            ..Default::default()
        }
    }

    pub fn compression(&self) -> Compression {
        Compression::from((self.attributes & COMPRESSION_CODEC_MASK) as i8)
    }

    pub fn is_transactional(&self) -> bool {
        self.attributes & TRANSACTIONAL_MASK != 0
    }

    /// Control batches carry cluster metadata (transaction markers);
    /// consumers skip them but the flag must survive decoding.
    pub fn is_control(&self) -> bool {
        self.attributes & CONTROL_MASK != 0
    }

    pub fn uses_log_append_time(&self) -> bool {
        self.attributes & TIMESTAMP_TYPE_MASK != 0
    }

    /// Encode the batch, computing the aggregate fields from the records
    /// and patching the batch length and CRC32-C in place.
    pub fn encode<T: ByteOrder>(&self, dst: &mut BytesMut) -> Result<()> {
        let mut records = BytesMut::with_capacity(64 * self.records.len() + 64);

        for record in &self.records {
            self.encode_record(&mut records, record)?;
        }

        let inner = self.compression().compress(&records)?;

        let last_offset_delta = self.records
            .last()
            .map_or(0, |record| (record.offset - self.base_offset) as i32);
        let max_timestamp = self.records
            .iter()
            .map(|record| record.timestamp)
            .max()
            .unwrap_or(self.base_timestamp);

        let start = dst.len();

        dst.put_i64::<T>(self.base_offset);
        dst.put_i32::<T>(0); // batch length, patched below
        dst.put_i32::<T>(self.partition_leader_epoch);
        dst.put_i8(MAGIC);
        dst.put_u32::<T>(0); // crc, patched below
        dst.put_i16::<T>(self.attributes);
        dst.put_i32::<T>(last_offset_delta);
        dst.put_i64::<T>(self.base_timestamp);
        dst.put_i64::<T>(max_timestamp);
        dst.put_i64::<T>(self.producer_id);
        dst.put_i16::<T>(self.producer_epoch);
        dst.put_i32::<T>(self.base_sequence);
        dst.put_i32::<T>(self.records.len() as i32);
        dst.put_slice(&inner);

        let batch_length = dst.len() - start - LENGTH_OFFSET - 4;
        T::write_i32(&mut dst[start + LENGTH_OFFSET..], batch_length as i32);

        let crc = crc32::checksum_castagnoli(&dst[start + ATTRIBUTES_OFFSET..]);
        T::write_u32(&mut dst[start + CRC_OFFSET..], crc);

        Ok(())
    }

    fn encode_record(&self, dst: &mut BytesMut, record: &Record) -> Result<()> {
        let mut body = BytesMut::with_capacity(
            64 + record.key.as_ref().map_or(0, |k| k.len())
                + record.value.as_ref().map_or(0, |v| v.len()),
        );

        body.put_i8(0); // record attributes, unused
        body.put_varlong(record.timestamp - self.base_timestamp);
        body.put_varint((record.offset - self.base_offset) as i32);

        put_varint_bytes(&mut body, record.key.as_ref().map(|k| &k[..]));
        put_varint_bytes(&mut body, record.value.as_ref().map(|v| &v[..]));

        body.put_varint(record.headers.len() as i32);

        for header in &record.headers {
            put_varint_bytes(&mut body, Some(header.key.as_bytes()));
            put_varint_bytes(&mut body, header.value.as_ref().map(|v| &v[..]));
        }

        dst.put_varint(body.len() as i32);
        dst.put_slice(&body);

        Ok(())
    }

    /// Decode one batch from the head of `data`, verifying magic and
    /// CRC32-C and decompressing the record block. Returns the batch and
    /// the bytes that follow it.
    pub fn parse(data: &[u8]) -> Result<(RecordBatch, &[u8])> {
        if data.len() < RECORDS_OFFSET {
            bail!(ErrorKind::CodecError("truncated record batch"));
        }

        let batch_length = BigEndian::read_i32(&data[LENGTH_OFFSET..]);

        if batch_length < (RECORDS_OFFSET - LENGTH_OFFSET - 4) as i32 {
            bail!(ErrorKind::CodecError("record batch length underflow"));
        }

        let total = LENGTH_OFFSET + 4 + batch_length as usize;

        if data.len() < total {
            bail!(ErrorKind::CodecError("truncated record batch"));
        }

        let batch = &data[..total];

        let magic = batch[16] as i8;

        if magic != MAGIC {
            bail!(ErrorKind::CodecError("unsupported record batch magic"));
        }

        let crc = BigEndian::read_u32(&batch[CRC_OFFSET..]);
        let computed = crc32::checksum_castagnoli(&batch[ATTRIBUTES_OFFSET..]);

        if crc != computed {
            trace!("record batch checksum mismatched, expected={}, current={}",
                   computed,
                   crc);

            bail!(ErrorKind::CodecError("record batch checksum mismatch"));
        }

        let base_offset = BigEndian::read_i64(&batch[0..]);
        let partition_leader_epoch = BigEndian::read_i32(&batch[12..]);
        let attributes = BigEndian::read_i16(&batch[ATTRIBUTES_OFFSET..]);
        let base_timestamp = BigEndian::read_i64(&batch[27..]);
        let max_timestamp = BigEndian::read_i64(&batch[35..]);
        let producer_id = BigEndian::read_i64(&batch[43..]);
        let producer_epoch = BigEndian::read_i16(&batch[51..]);
        let base_sequence = BigEndian::read_i32(&batch[53..]);
        let record_count = BigEndian::read_i32(&batch[57..]);

        if record_count < 0 {
            bail!(ErrorKind::CodecError("negative record count"));
        }

        let codec = (attributes & COMPRESSION_CODEC_MASK) as i8;

        if codec > Compression::Zstd as i8 {
            bail!(ErrorKind::UnsupportedCompression(codec));
        }

        let inner = Compression::from(codec).decompress(&batch[RECORDS_OFFSET..])?;

        // the count is wire data; let the vector grow instead of trusting it
        let mut records = Vec::new();
        let mut input = &inner[..];

        for _ in 0..record_count {
            match parse_record(input, base_offset, base_timestamp) {
                IResult::Done(rest, record) => {
                    records.push(record);

                    input = rest;
                }
                IResult::Incomplete(_) => bail!(ErrorKind::CodecError("truncated record")),
                IResult::Error(_) => bail!(ErrorKind::CodecError("malformed record")),
            }
        }

        Ok((RecordBatch {
                base_offset: base_offset,
                partition_leader_epoch: partition_leader_epoch,
                attributes: attributes,
                base_timestamp: base_timestamp,
                max_timestamp: max_timestamp,
                producer_id: producer_id,
                producer_epoch: producer_epoch,
                base_sequence: base_sequence,
                records: records,
            },
            &data[total..]))
    }
}

/// Decode every complete batch in a raw record set. A truncated trailing
/// batch (brokers cut record sets at `max_bytes`) is discarded.
pub fn parse_record_set(data: &[u8]) -> Result<Vec<RecordBatch>> {
    let mut batches = Vec::new();
    let mut rest = data;

    while rest.len() >= RECORDS_OFFSET {
        let batch_length = BigEndian::read_i32(&rest[LENGTH_OFFSET..]);

        if batch_length < 0 || rest.len() < LENGTH_OFFSET + 4 + batch_length as usize {
            trace!("discarding {} trailing bytes of a truncated batch", rest.len());

            break;
        }

        let (batch, remaining) = RecordBatch::parse(rest)?;

        batches.push(batch);

        rest = remaining;
    }

    Ok(batches)
}

fn put_varint_bytes(buf: &mut BytesMut, data: Option<&[u8]>) {
    match data {
        Some(data) => {
            buf.put_varint(data.len() as i32);
            buf.put_slice(data);
        }
        None => buf.put_varint(-1),
    }
}

named!(parse_varint_bytes<Option<&[u8]>>,
    do_parse!(
        len: parse_varint
     >> d: cond!(len >= 0, take!(len as usize))
     >> (d)
    )
);

named!(parse_varint_string<&str>,
    do_parse!(
        len: parse_varint
     >> s: cond_reduce!(len >= 0, map_res!(take!(len as usize), str::from_utf8))
     >> (s)
    )
);

fn parse_record(i: &[u8], base_offset: Offset, base_timestamp: Timestamp) -> IResult<&[u8], Record> {
    let (rest, len) = try_parse!(i, parse_varint);

    if len < 0 {
        return IResult::Error(nom::Err::Position(
            nom::ErrorKind::Custom(::protocol::ParseTag::Record as u32),
            i,
        ));
    }

    let (remaining, body) = try_parse!(rest, take!(len as usize));

    let (b, _attributes) = try_parse!(body, be_i8);
    let (b, timestamp_delta) = try_parse!(b, parse_varlong);
    let (b, offset_delta) = try_parse!(b, parse_varint);
    let (b, key) = try_parse!(b, parse_varint_bytes);
    let (b, value) = try_parse!(b, parse_varint_bytes);
    let (b, header_count) = try_parse!(b, parse_varint);

    let mut input = b;
    let mut headers = Vec::new();

    for _ in 0..header_count {
        let (r, key) = try_parse!(input, parse_varint_string);
        let (r, value) = try_parse!(r, parse_varint_bytes);

        headers.push(RecordHeader {
                         key: key.to_owned(),
                         value: value.map(|v| Bytes::from(v.to_vec())),
                     });

        input = r;
    }

    IResult::Done(remaining,
                  Record {
                      offset: base_offset + Offset::from(offset_delta),
                      timestamp: base_timestamp + timestamp_delta,
                      key: key.map(|k| Bytes::from(k.to_vec())),
                      value: value.map(|v| Bytes::from(v.to_vec())),
                      headers: headers,
                  })
}

#[cfg(test)]
mod tests {
    use bytes::BigEndian;

    use super::*;

    fn sample_batch() -> RecordBatch {
        RecordBatch {
            base_offset: 42,
            base_timestamp: 1_700_000_000_000,
            max_timestamp: 1_700_000_000_001,
            records: vec![Record {
                              offset: 42,
                              timestamp: 1_700_000_000_000,
                              key: Some(Bytes::from(&b"k"[..])),
                              value: Some(Bytes::from(&b"v"[..])),
                              headers: vec![RecordHeader {
                                                key: "trace".to_owned(),
                                                value: Some(Bytes::from(&b"abc"[..])),
                                            }],
                          },
                          Record {
                              offset: 43,
                              timestamp: 1_700_000_000_001,
                              key: None,
                              value: Some(Bytes::from(&b"second"[..])),
                              headers: vec![],
                          }],
            ..Default::default()
        }
    }

    #[test]
    fn test_batch_roundtrip() {
        let batch = sample_batch();

        let mut buf = BytesMut::with_capacity(256);
        batch.encode::<BigEndian>(&mut buf).unwrap();

        let (parsed, rest) = RecordBatch::parse(&buf[..]).unwrap();

        assert!(rest.is_empty());
        assert_eq!(parsed, batch);

        // re-encoding a decoded batch yields the same bytes
        let mut buf2 = BytesMut::with_capacity(256);
        parsed.encode::<BigEndian>(&mut buf2).unwrap();

        assert_eq!(&buf2[..], &buf[..]);
    }

    #[test]
    fn test_batch_layout() {
        let batch = sample_batch();

        let mut buf = BytesMut::with_capacity(256);
        batch.encode::<BigEndian>(&mut buf).unwrap();

        assert_eq!(BigEndian::read_i64(&buf[0..]), 42); // base offset
        assert_eq!(buf[16] as i8, 2); // magic
        assert_eq!(BigEndian::read_i16(&buf[21..]), 0); // attributes
        assert_eq!(BigEndian::read_i32(&buf[23..]), 1); // last offset delta
        assert_eq!(BigEndian::read_i64(&buf[27..]), 1_700_000_000_000);
        assert_eq!(BigEndian::read_i32(&buf[57..]), 2); // record count

        // batch length covers everything after itself
        assert_eq!(BigEndian::read_i32(&buf[8..]) as usize, buf.len() - 12);

        // crc covers attributes through the end
        assert_eq!(BigEndian::read_u32(&buf[17..]),
                   ::crc::crc32::checksum_castagnoli(&buf[21..]));
    }

    #[test]
    fn test_corrupt_batch_rejected() {
        let batch = sample_batch();

        let mut buf = BytesMut::with_capacity(256);
        batch.encode::<BigEndian>(&mut buf).unwrap();

        // flip a bit inside the covered span
        let len = buf.len();
        buf[len - 1] ^= 0x01;

        let err = RecordBatch::parse(&buf[..]).unwrap_err();

        match *err.kind() {
            ::errors::ErrorKind::CodecError(reason) => {
                assert_eq!(reason, "record batch checksum mismatch")
            }
            ref kind => panic!("expected checksum mismatch, got {:?}", kind),
        }
    }

    #[test]
    fn test_unsupported_magic_rejected() {
        let batch = sample_batch();

        let mut buf = BytesMut::with_capacity(256);
        batch.encode::<BigEndian>(&mut buf).unwrap();

        buf[16] = 1;

        let err = RecordBatch::parse(&buf[..]).unwrap_err();

        match *err.kind() {
            ::errors::ErrorKind::CodecError(reason) => {
                assert_eq!(reason, "unsupported record batch magic")
            }
            ref kind => panic!("expected magic error, got {:?}", kind),
        }
    }

    #[test]
    fn test_control_flag_survives() {
        let mut batch = sample_batch();
        batch.attributes |= CONTROL_MASK;

        let mut buf = BytesMut::with_capacity(256);
        batch.encode::<BigEndian>(&mut buf).unwrap();

        let (parsed, _) = RecordBatch::parse(&buf[..]).unwrap();

        assert!(parsed.is_control());
        assert!(!parsed.is_transactional());
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_compressed_batch_roundtrip() {
        let mut batch = sample_batch();
        batch.attributes |= Compression::Gzip as i16;

        assert_eq!(batch.compression(), Compression::Gzip);

        let mut buf = BytesMut::with_capacity(256);
        batch.encode::<BigEndian>(&mut buf).unwrap();

        let (parsed, _) = RecordBatch::parse(&buf[..]).unwrap();

        assert_eq!(parsed, batch);
    }

    #[test]
    fn test_parse_record_set() {
        let first = sample_batch();
        let second = RecordBatch {
            base_offset: 44,
            base_timestamp: 1_700_000_000_002,
            max_timestamp: 1_700_000_000_002,
            records: vec![Record {
                              offset: 44,
                              timestamp: 1_700_000_000_002,
                              key: None,
                              value: None,
                              headers: vec![],
                          }],
            ..Default::default()
        };

        let mut buf = BytesMut::with_capacity(512);
        first.encode::<BigEndian>(&mut buf).unwrap();
        second.encode::<BigEndian>(&mut buf).unwrap();

        // a truncated third batch is discarded, not an error
        buf.extend_from_slice(&[0u8; 20]);

        let batches = parse_record_set(&buf[..]).unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], first);
        assert_eq!(batches[1], second);
    }
}
