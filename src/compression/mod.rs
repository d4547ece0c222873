use std::mem;

#[cfg(feature = "gzip")]
use std::io::prelude::*;

use errors::{ErrorKind, Result};

/// Compression codec of a record batch, carried in the low 3 bits
/// of the batch attributes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Compression {
    None = 0,
    Gzip = 1,
    Snappy = 2,
    Lz4 = 3,
    Zstd = 4,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::None
    }
}

impl From<i8> for Compression {
    fn from(v: i8) -> Self {
        unsafe { mem::transmute(v) }
    }
}

impl Compression {
    /// Compress an encoded record block.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match *self {
            Compression::None => Ok(data.to_vec()),
            #[cfg(feature = "gzip")]
            Compression::Gzip => {
                let mut encoder =
                    ::flate2::write::GzEncoder::new(Vec::new(), ::flate2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            #[cfg(feature = "snappy")]
            Compression::Snappy => {
                ::snap::Encoder::new()
                    .compress_vec(data)
                    .map_err(|_| ErrorKind::CodecError("snappy compression failed").into())
            }
            #[cfg(feature = "lz4")]
            Compression::Lz4 => Ok(::lz4_compress::compress(data)),
            #[cfg(feature = "zstd-compression")]
            Compression::Zstd => {
                ::zstd::stream::encode_all(data, 0)
                    .map_err(|_| ErrorKind::CodecError("zstd compression failed").into())
            }
            #[allow(unreachable_patterns)]
            _ => bail!(ErrorKind::UnsupportedCompression(*self as i8)),
        }
    }

    /// Decompress the inner block of a record batch.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match *self {
            Compression::None => Ok(data.to_vec()),
            #[cfg(feature = "gzip")]
            Compression::Gzip => {
                let mut buf = Vec::new();
                ::flate2::read::GzDecoder::new(data).read_to_end(&mut buf)?;
                Ok(buf)
            }
            #[cfg(feature = "snappy")]
            Compression::Snappy => {
                ::snap::Decoder::new()
                    .decompress_vec(data)
                    .map_err(|_| ErrorKind::CodecError("snappy decompression failed").into())
            }
            #[cfg(feature = "lz4")]
            Compression::Lz4 => {
                ::lz4_compress::decompress(data)
                    .map_err(|_| ErrorKind::CodecError("lz4 decompression failed").into())
            }
            #[cfg(feature = "zstd-compression")]
            Compression::Zstd => {
                ::zstd::stream::decode_all(data)
                    .map_err(|_| ErrorKind::CodecError("zstd decompression failed").into())
            }
            #[allow(unreachable_patterns)]
            _ => bail!(ErrorKind::UnsupportedCompression(*self as i8)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_roundtrip() {
        let data = b"some records".to_vec();

        assert_eq!(Compression::None.compress(&data).unwrap(), data);
        assert_eq!(Compression::None.decompress(&data).unwrap(), data);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_gzip_roundtrip() {
        let data = b"gzip gzip gzip gzip gzip".to_vec();
        let compressed = Compression::Gzip.compress(&data).unwrap();

        assert_ne!(compressed, data);
        assert_eq!(Compression::Gzip.decompress(&compressed).unwrap(), data);
    }

    #[cfg(feature = "snappy")]
    #[test]
    fn test_snappy_roundtrip() {
        let data = b"snappy snappy snappy snappy".to_vec();
        let compressed = Compression::Snappy.compress(&data).unwrap();

        assert_eq!(Compression::Snappy.decompress(&compressed).unwrap(), data);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_lz4_roundtrip() {
        let data = b"lz4 lz4 lz4 lz4 lz4 lz4".to_vec();
        let compressed = Compression::Lz4.compress(&data).unwrap();

        assert_eq!(Compression::Lz4.decompress(&compressed).unwrap(), data);
    }

    #[cfg(feature = "zstd-compression")]
    #[test]
    fn test_zstd_roundtrip() {
        let data = b"zstd zstd zstd zstd zstd".to_vec();
        let compressed = Compression::Zstd.compress(&data).unwrap();

        assert_eq!(Compression::Zstd.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_from_attributes_bits() {
        assert_eq!(Compression::from(0), Compression::None);
        assert_eq!(Compression::from(1), Compression::Gzip);
        assert_eq!(Compression::from(2), Compression::Snappy);
        assert_eq!(Compression::from(3), Compression::Lz4);
        assert_eq!(Compression::from(4), Compression::Zstd);
    }
}
