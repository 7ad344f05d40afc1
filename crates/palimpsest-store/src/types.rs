//! Content-Unit Model
//!
//! The entities every other crate operates on: chains, keys, and the stored
//! unit itself.
//!
//! ## Chains
//!
//! A chain is the ordered set of content units belonging to one owner —
//! either a page's raw revision history ([`Track::Source`]) or one of its
//! rendered snapshot tiers ([`Track::Tier`]). Units are strictly ordered by
//! [`UnitKey`], and no two units of a chain share a key.
//!
//! ## Keys and Identity
//!
//! `UnitKey` is the chronological position: a millisecond timestamp plus an
//! ingestion sequence number. The sequence number is the tie-break for
//! units sharing a timestamp — chain walking only needs *a* total order,
//! and the ingestion sequence is deterministic across re-imports of the
//! same dump.
//!
//! `UnitId` is identity, not position: it never changes once a unit is
//! written, even when an out-of-order edit rewrites the unit's payload.
//! Source chains use the revision id from the dump.

use bytes::Bytes;
use palimpsest_core::Encoding;
use serde::{Deserialize, Serialize};

/// Which of a page's chains a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Track {
    /// The raw wikitext revision history.
    Source,
    /// A derived rendered-snapshot tier.
    Tier(u16),
}

impl Track {
    /// Single-column encoding for the SQLite backend.
    pub fn to_i64(self) -> i64 {
        match self {
            Track::Source => -1,
            Track::Tier(n) => n as i64,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        if value < 0 {
            Track::Source
        } else {
            Track::Tier(value as u16)
        }
    }
}

/// Identifies one chain: one page, one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId {
    pub page_id: u64,
    pub track: Track,
}

impl ChainId {
    pub fn source(page_id: u64) -> Self {
        Self {
            page_id,
            track: Track::Source,
        }
    }

    pub fn tier(page_id: u64, tier: u16) -> Self {
        Self {
            page_id,
            track: Track::Tier(tier),
        }
    }
}

/// Chronological position of a unit within its chain.
///
/// Ordered by `(timestamp_ms, seq)`; `seq` breaks ties between units
/// sharing a timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UnitKey {
    pub timestamp_ms: i64,
    pub seq: u32,
}

impl UnitKey {
    pub fn new(timestamp_ms: i64, seq: u32) -> Self {
        Self { timestamp_ms, seq }
    }
}

/// Stable identity of a unit within its chain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UnitId(pub u64);

/// One stored version of a page's content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUnit {
    pub chain: ChainId,
    pub id: UnitId,
    pub key: UnitKey,

    /// Explicit predecessor identity. `None` on snapshot chains, where the
    /// predecessor is the chronologically previous unit of the same chain.
    pub parent: Option<UnitId>,

    pub encoding: Encoding,

    /// Stored payload: compressed plaintext for full encodings, a patch
    /// against the predecessor's *plaintext* for `Encoding::Diff`.
    pub payload: Bytes,

    /// Lowercase-hex SHA-256 of the plaintext, when the writer computed it.
    pub content_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_is_timestamp_then_seq() {
        let a = UnitKey::new(100, 5);
        let b = UnitKey::new(100, 6);
        let c = UnitKey::new(101, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_track_column_roundtrip() {
        for track in [Track::Source, Track::Tier(0), Track::Tier(7)] {
            assert_eq!(Track::from_i64(track.to_i64()), track);
        }
    }
}
