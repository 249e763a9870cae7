// src/install/archive.rs

//! Archive decoding and integrity checks

use crate::error::{Error, Result};
use crate::narinfo::{Compression, sha256_matches};
use crate::store::name::nix_base32_encode;
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use xz2::read::XzDecoder;

/// Wrap `reader` in the decoder for `compression`.
///
/// Errors raised later while reading carry the compression and archive
/// names so a corrupt download is distinguishable from a bad NAR.
pub fn decompress(
    reader: Box<dyn Read + Send>,
    compression: &Compression,
    archive: &str,
) -> Result<Box<dyn Read + Send>> {
    let decoder: Box<dyn Read + Send> = match compression {
        Compression::None => return Ok(reader),
        Compression::Xz => Box::new(XzDecoder::new(reader)),
        Compression::Gzip => Box::new(GzDecoder::new(reader)),
        Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
        Compression::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(|e| Error::Decompress {
                archive: archive.to_string(),
                compression: compression.to_string(),
                source: e,
            })?;
            Box::new(decoder)
        }
        Compression::Other(_) => {
            return Err(Error::UnsupportedCompression(compression.to_string()));
        }
    };

    Ok(Box::new(Labelled {
        inner: decoder,
        label: format!("{} decompression of {}", compression, archive),
    }))
}

struct Labelled<R> {
    inner: R,
    label: String,
}

impl<R: Read> Read for Labelled<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner
            .read(buf)
            .map_err(|e| io::Error::new(e.kind(), format!("{} failed: {}", self.label, e)))
    }
}

/// Hashes and counts everything read through it
pub struct Verifier<R> {
    inner: R,
    hasher: Sha256,
    len: u64,
}

impl<R: Read> Verifier<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            len: 0,
        }
    }

    /// Read whatever is left and compare against the expected NAR size and
    /// hash. Either expectation may be absent.
    pub fn finish(mut self, archive: &str, nar_hash: Option<&str>, nar_size: Option<u64>) -> Result<()> {
        io::copy(&mut self, &mut io::sink())?;

        if let Some(expected) = nar_size {
            if expected != self.len {
                return Err(Error::ChecksumMismatch {
                    archive: archive.to_string(),
                    expected: format!("{} bytes", expected),
                    actual: format!("{} bytes", self.len),
                });
            }
        }

        if let Some(expected) = nar_hash {
            let digest = self.hasher.finalize();
            if sha256_matches(expected, &digest)? == Some(false) {
                return Err(Error::ChecksumMismatch {
                    archive: archive.to_string(),
                    expected: expected.to_string(),
                    actual: format!("sha256:{}", nix_base32_encode(&digest)),
                });
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for Verifier<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.len += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn boxed(data: Vec<u8>) -> Box<dyn Read + Send> {
        Box::new(Cursor::new(data))
    }

    fn read_all(mut reader: Box<dyn Read + Send>) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_decompress_schemes() {
        let payload = b"nix-archive-1 pretend".to_vec();

        let mut xz = xz2::write::XzEncoder::new(Vec::new(), 6);
        xz.write_all(&payload).unwrap();
        let xz = xz.finish().unwrap();

        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(&payload).unwrap();
        let gz = gz.finish().unwrap();

        let zst = zstd::encode_all(Cursor::new(&payload), 0).unwrap();

        let mut bz = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        bz.write_all(&payload).unwrap();
        let bz = bz.finish().unwrap();

        for (compression, data) in [
            (Compression::None, payload.clone()),
            (Compression::Xz, xz),
            (Compression::Gzip, gz),
            (Compression::Zstd, zst),
            (Compression::Bzip2, bz),
        ] {
            let reader = decompress(boxed(data), &compression, "test.nar").unwrap();
            assert_eq!(read_all(reader).unwrap(), payload, "{}", compression);
        }
    }

    #[test]
    fn test_unsupported_compression() {
        assert!(matches!(
            decompress(boxed(Vec::new()), &Compression::Other("br".to_string()), "x"),
            Err(Error::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn test_corrupt_stream_names_archive() {
        let reader = decompress(boxed(b"not xz at all".to_vec()), &Compression::Xz, "nar/abc.nar.xz").unwrap();
        let err = read_all(reader).unwrap_err();
        assert!(err.to_string().contains("xz decompression of nar/abc.nar.xz"));
    }

    #[test]
    fn test_verifier() {
        let data = b"some archive bytes".to_vec();
        let hash = format!("sha256:{}", nix_base32_encode(&Sha256::digest(&data)));

        let ok = Verifier::new(Cursor::new(data.clone()));
        assert!(ok.finish("a", Some(&hash), Some(data.len() as u64)).is_ok());

        let short = Verifier::new(Cursor::new(data.clone()));
        assert!(matches!(
            short.finish("a", None, Some(1)),
            Err(Error::ChecksumMismatch { .. })
        ));

        let other = Verifier::new(Cursor::new(b"tampered".to_vec()));
        assert!(matches!(
            other.finish("a", Some(&hash), None),
            Err(Error::ChecksumMismatch { .. })
        ));
    }
}
