//! Compress / Decompress for Full Content Units
//!
//! This module implements the self-contained half of the codec: turning
//! plaintext into a stored payload and back for every full encoding.
//!
//! ## Round-Trip Contract
//!
//! For every plaintext `x` and every full encoding `k`:
//!
//! ```text
//! decompress(compress(x, k), k) == x    (byte-exact)
//! ```
//!
//! `Encoding::Diff` is deliberately rejected here: a diff payload is only
//! meaningful relative to a predecessor plaintext, and is produced and
//! consumed by the patch module instead.
//!
//! ## Choosing an Encoding
//!
//! - **Raw**: no CPU cost, no space savings. Used for empty payloads and as
//!   the forward-progress fallback when a pipeline task exhausts retries.
//! - **Gzip**: cheap, moderate ratio. The default keyframe encoding.
//! - **Bzip2**: slower, better ratio on natural-language text. Also the
//!   compressor applied to serialized patches.
//! - **Lzma2**: slowest, best ratio. Worth it for cold archival chains.

use std::io::{Read, Write};

use bytes::Bytes;

use crate::{Encoding, Error, Result};

/// Compress plaintext into a stored payload.
///
/// Rejects `Encoding::Diff` — diff payloads come from [`crate::diff`].
pub fn compress(plain: &[u8], encoding: Encoding) -> Result<Bytes> {
    match encoding {
        Encoding::Raw => Ok(Bytes::copy_from_slice(plain)),
        Encoding::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(plain)
                .and_then(|_| encoder.finish())
                .map(Bytes::from)
                .map_err(|e| Error::Compression(e.to_string()))
        }
        Encoding::Bzip2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
            encoder
                .write_all(plain)
                .and_then(|_| encoder.finish())
                .map(Bytes::from)
                .map_err(|e| Error::Compression(e.to_string()))
        }
        Encoding::Lzma2 => {
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
            encoder
                .write_all(plain)
                .and_then(|_| encoder.finish())
                .map(Bytes::from)
                .map_err(|e| Error::Compression(e.to_string()))
        }
        Encoding::Diff => Err(Error::InvalidEncoding(Encoding::Diff as u16)),
    }
}

/// Decompress a stored payload back into plaintext.
///
/// Corrupt streams surface as `Error::Decompression`, never as truncated
/// output.
pub fn decompress(stored: &[u8], encoding: Encoding) -> Result<Bytes> {
    match encoding {
        Encoding::Raw => Ok(Bytes::copy_from_slice(stored)),
        Encoding::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(stored);
            let mut plain = Vec::new();
            decoder
                .read_to_end(&mut plain)
                .map_err(|e| Error::Decompression(e.to_string()))?;
            Ok(Bytes::from(plain))
        }
        Encoding::Bzip2 => {
            let mut decoder = bzip2::read::BzDecoder::new(stored);
            let mut plain = Vec::new();
            decoder
                .read_to_end(&mut plain)
                .map_err(|e| Error::Decompression(e.to_string()))?;
            Ok(Bytes::from(plain))
        }
        Encoding::Lzma2 => {
            let mut decoder = xz2::read::XzDecoder::new(stored);
            let mut plain = Vec::new();
            decoder
                .read_to_end(&mut plain)
                .map_err(|e| Error::Decompression(e.to_string()))?;
            Ok(Bytes::from(plain))
        }
        Encoding::Diff => Err(Error::InvalidEncoding(Encoding::Diff as u16)),
    }
}
