use bytes::{BufMut, BytesMut};
use byteorder::{BigEndian, ByteOrder};

use uuid::Uuid;

use errors::{ErrorKind, Result};

/// Append every Kafka wire primitive to a write buffer.
///
/// Strings, bytes and arrays come in two length conventions: the classic
/// form (`i16`/`i32` length, `-1` = null) and the compact form introduced
/// with flexible versions (unsigned varint of `len + 1`, `0` = null).
/// A compact length of `0` (null) and `1` (empty) are distinct encodings.
pub trait WriteExt: BufMut + Sized {
    /// Classic nullable string: `i16` length then the raw bytes.
    fn put_str<T: ByteOrder, S: AsRef<str>>(&mut self, s: Option<S>) -> Result<()> {
        match s {
            Some(s) => {
                let s = s.as_ref();

                if s.len() > i16::max_value() as usize {
                    bail!(ErrorKind::CodecError("string exceeds i16 length"));
                }

                self.put_i16::<T>(s.len() as i16);
                self.put_slice(s.as_bytes());
            }
            None => self.put_i16::<T>(-1),
        }

        Ok(())
    }

    /// Compact nullable string: unsigned varint of `len + 1`.
    fn put_compact_str<S: AsRef<str>>(&mut self, s: Option<S>) -> Result<()> {
        match s {
            Some(s) => {
                let s = s.as_ref();

                self.put_unsigned_varint(s.len() as u64 + 1);
                self.put_slice(s.as_bytes());
            }
            None => self.put_unsigned_varint(0),
        }

        Ok(())
    }

    /// Classic nullable bytes: `i32` length then the raw bytes.
    fn put_bytes<T: ByteOrder, D: AsRef<[u8]>>(&mut self, d: Option<D>) -> Result<()> {
        match d {
            Some(d) => {
                let d = d.as_ref();

                if d.len() > i32::max_value() as usize {
                    bail!(ErrorKind::CodecError("bytes exceed i32 length"));
                }

                self.put_i32::<T>(d.len() as i32);
                self.put_slice(d);
            }
            None => self.put_i32::<T>(-1),
        }

        Ok(())
    }

    /// Compact nullable bytes: unsigned varint of `len + 1`.
    fn put_compact_bytes<D: AsRef<[u8]>>(&mut self, d: Option<D>) -> Result<()> {
        match d {
            Some(d) => {
                let d = d.as_ref();

                self.put_unsigned_varint(d.len() as u64 + 1);
                self.put_slice(d);
            }
            None => self.put_unsigned_varint(0),
        }

        Ok(())
    }

    /// Classic nullable array: `i32` count (`-1` = null) then the items.
    fn put_array<T, E, F>(&mut self, items: Option<&[E]>, mut f: F) -> Result<()>
    where
        T: ByteOrder,
        F: FnMut(&mut Self, &E) -> Result<()>,
    {
        match items {
            Some(items) => {
                self.put_i32::<T>(items.len() as i32);

                for item in items {
                    f(self, item)?;
                }
            }
            None => self.put_i32::<T>(-1),
        }

        Ok(())
    }

    /// Compact nullable array: unsigned varint of `count + 1` (`0` = null).
    ///
    /// With `tagged`, an empty tagged-field block follows each item, for
    /// flexible structs whose per-item encoder does not write its own.
    fn put_compact_array<E, F>(&mut self, items: Option<&[E]>, tagged: bool, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Self, &E) -> Result<()>,
    {
        match items {
            Some(items) => {
                self.put_unsigned_varint(items.len() as u64 + 1);

                for item in items {
                    f(self, item)?;

                    if tagged {
                        self.put_tagged_fields();
                    }
                }
            }
            None => self.put_unsigned_varint(0),
        }

        Ok(())
    }

    /// Unsigned varint: 7 bits per byte, high bit is the continuation flag.
    fn put_unsigned_varint(&mut self, mut v: u64) {
        loop {
            let b = (v & 0x7F) as u8;

            v >>= 7;

            if v != 0 {
                self.put_u8(b | 0x80);
            } else {
                self.put_u8(b);
                break;
            }
        }
    }

    /// Zig-zag encoded signed 32-bit varint.
    fn put_varint(&mut self, v: i32) {
        self.put_unsigned_varint(((v << 1) ^ (v >> 31)) as u32 as u64)
    }

    /// Zig-zag encoded signed 64-bit varint.
    fn put_varlong(&mut self, v: i64) {
        self.put_unsigned_varint(((v << 1) ^ (v >> 63)) as u64)
    }

    /// 16 raw bytes; null encodes as all zeros.
    fn put_uuid(&mut self, v: Option<Uuid>) {
        match v {
            Some(v) => self.put_slice(v.as_bytes()),
            None => self.put_slice(&[0u8; 16]),
        }
    }

    /// An empty tagged-field block: a single zero count byte.
    ///
    /// This layer never emits tags of its own; the block exists so
    /// brokers may append backward-compatible fields.
    fn put_tagged_fields(&mut self) {
        self.put_u8(0);
    }
}

impl<B: BufMut + Sized> WriteExt for B {}

/// Patch the frame length into the 4-byte slot reserved at the head of the
/// buffer, covering everything that follows it. Done exactly once per
/// request frame, right before the frame is handed to the socket.
pub fn prepend_length(buf: &mut BytesMut) -> Result<()> {
    if buf.len() < 4 {
        bail!(ErrorKind::UnfinishedWriteBuffer);
    }

    let len = buf.len() - 4;

    BigEndian::write_i32(&mut buf[0..4], len as i32);

    Ok(())
}
