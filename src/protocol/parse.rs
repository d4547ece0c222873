use std::str;
use std::borrow::{Cow, ToOwned};
use std::result::Result as StdResult;

use nom::{self, IResult, Needed};

use uuid::Uuid;

use protocol::ParseTag;

/// Opaque tagged-field block: `(tag, raw bytes)` pairs.
///
/// This layer parses the block to keep its cursor honest but assigns no
/// meaning to individual tags.
pub type TaggedFields = Vec<(u32, Vec<u8>)>;

/// Unsigned varint: 7 bits per byte, little-endian groups, high bit set
/// while more bytes follow. At most 10 bytes for a 64-bit value.
pub fn parse_unsigned_varint(i: &[u8]) -> IResult<&[u8], u64> {
    let mut value = 0u64;
    let mut shift = 0;

    for (idx, &b) in i.iter().enumerate() {
        value |= u64::from(b & 0x7F) << shift;

        if b & 0x80 == 0 {
            return IResult::Done(&i[idx + 1..], value);
        }

        shift += 7;

        if shift > 63 {
            return IResult::Error(nom::Err::Position(
                nom::ErrorKind::Custom(ParseTag::UnsignedVarInt as u32),
                i,
            ));
        }
    }

    IResult::Incomplete(Needed::Unknown)
}

fn unzigzag32(n: u64) -> i32 {
    let n = n as u32;

    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

fn unzigzag64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

named!(pub parse_varint<i32>,
    parse_tag!(ParseTag::VarInt, map!(parse_unsigned_varint, unzigzag32))
);

named!(pub parse_varlong<i64>,
    parse_tag!(ParseTag::VarLong, map!(parse_unsigned_varint, unzigzag64))
);

named!(pub parse_compact_str<Option<Cow<str>>>,
    parse_tag!(ParseTag::String,
        do_parse!(
            len: parse_unsigned_varint
         >> s: cond!(len > 0, map!(map_res!(take!((len - 1) as usize), str::from_utf8), Cow::from))
         >> (s)
        )
    )
);

named!(pub parse_compact_string<String>,
    parse_tag!(ParseTag::String,
        do_parse!(
            len: parse_unsigned_varint
         >> s: cond_reduce!(len > 0, map!(map_res!(take!((len - 1) as usize), str::from_utf8), ToOwned::to_owned))
         >> (s)
        )
    )
);

named!(pub parse_compact_bytes<Option<Cow<[u8]>>>,
    parse_tag!(ParseTag::Bytes,
        do_parse!(
            len: parse_unsigned_varint
         >> d: cond!(len > 0, map!(take!((len - 1) as usize), Cow::from))
         >> (d)
        )
    )
);

fn uuid_from_wire(b: &[u8]) -> StdResult<Option<Uuid>, ::uuid::ParseError> {
    if b.iter().all(|&x| x == 0) {
        Ok(None)
    } else {
        Uuid::from_bytes(b).map(Some)
    }
}

named!(pub parse_uuid<Option<Uuid>>,
    parse_tag!(ParseTag::Uuid, map_res!(take!(16), uuid_from_wire))
);

/// Tagged-field block: varint count, then per field a varint tag, a
/// varint size and that many raw bytes.
pub fn parse_tagged_fields(i: &[u8]) -> IResult<&[u8], TaggedFields> {
    let (first, count) = try_parse!(i, parse_unsigned_varint);

    let mut rest = first;
    let mut fields = Vec::new();

    for _ in 0..count {
        let (r, tag) = try_parse!(rest, parse_unsigned_varint);
        let (r, size) = try_parse!(r, parse_unsigned_varint);
        let (r, data) = try_parse!(r, take!(size as usize));

        fields.push((tag as u32, data.to_vec()));

        rest = r;
    }

    IResult::Done(rest, fields)
}
