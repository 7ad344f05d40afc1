//! Storage Encodings for Content Units
//!
//! Every stored version of a page carries one of these encodings. The first
//! four are self-contained: the payload decompresses to the full plaintext
//! on its own. `Diff` payloads are different — they hold a binary patch
//! against the *plaintext* of the unit's chronological predecessor (never
//! against the predecessor's compressed bytes), so decoding one requires
//! walking the chain back to a full unit first.
//!
//! The numeric ids are persisted, so they are append-only: never renumber
//! an existing variant.

use serde::{Deserialize, Serialize};

/// How a content unit's payload is encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Encoding {
    /// Plaintext bytes, stored as-is.
    Raw = 0,
    /// DEFLATE with gzip framing.
    Gzip = 1,
    /// Burrows-Wheeler (bzip2).
    Bzip2 = 2,
    /// LZMA2 in an xz container.
    Lzma2 = 3,
    /// Binary patch against the predecessor's plaintext.
    Diff = 4,
}

impl Encoding {
    /// True for encodings whose payload decodes without a predecessor.
    pub fn is_full(self) -> bool {
        self != Encoding::Diff
    }
}

impl TryFrom<u16> for Encoding {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Encoding::Raw),
            1 => Ok(Encoding::Gzip),
            2 => Ok(Encoding::Bzip2),
            3 => Ok(Encoding::Lzma2),
            4 => Ok(Encoding::Diff),
            _ => Err(crate::Error::InvalidEncoding(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_id_roundtrip() {
        for enc in [
            Encoding::Raw,
            Encoding::Gzip,
            Encoding::Bzip2,
            Encoding::Lzma2,
            Encoding::Diff,
        ] {
            let id = enc as u16;
            assert_eq!(Encoding::try_from(id).unwrap(), enc);
        }
    }

    #[test]
    fn test_unknown_encoding_id_rejected() {
        let err = Encoding::try_from(99).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidEncoding(99)));
    }

    #[test]
    fn test_diff_is_not_full() {
        assert!(Encoding::Raw.is_full());
        assert!(Encoding::Lzma2.is_full());
        assert!(!Encoding::Diff.is_full());
    }
}
