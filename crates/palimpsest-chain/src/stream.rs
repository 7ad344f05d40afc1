//! Streaming Reconstruction - Forward Decode of a Whole Chain
//!
//! Point reconstruction pays the backward-run cost per lookup. When a
//! caller wants *every* version of a page (export, tier rendering, link
//! extraction), that cost multiplies: O(chain length × average run
//! length) decode steps. This module amortizes it to O(chain length) by
//! keeping one rolling plaintext while walking forward:
//!
//! - next unit is a diff → apply its patch to the rolling value
//! - next unit is full → decompress and replace the rolling value
//!
//! The trade-offs, compared to point lookups:
//!
//! - the stream holds an open read scope on the backing store for its
//!   whole lifetime, so it must be explicitly [`close`](ChainStream::close)d
//! - consumption is forward-only and non-restartable
//!
//! Starting mid-chain is allowed: if the first yielded unit is a diff,
//! it alone is point-reconstructed, and the rolling value takes over from
//! there.

use std::sync::Arc;

use bytes::Bytes;
use palimpsest_core::{apply, decompress, Encoding};
use palimpsest_store::{ChainCursor, ChainId, ChainStore, ContentUnit, StoreError, UnitKey};

use crate::reconstruct::{plaintext_hash, reconstruct_unit};
use crate::{ChainError, Result};

/// Lazy forward traversal of one chain, yielding `(unit, plaintext)`.
pub struct ChainStream {
    store: Arc<dyn ChainStore>,
    cursor: Option<Box<dyn ChainCursor>>,
    rolling: Option<Bytes>,
}

impl ChainStream {
    /// Open a stream over `chain`, starting at `from` (inclusive) or at
    /// the chain head.
    pub async fn open(
        store: Arc<dyn ChainStore>,
        chain: ChainId,
        from: Option<UnitKey>,
    ) -> Result<Self> {
        let cursor = store.open_chain(&chain, from).await?;
        Ok(Self {
            store,
            cursor: Some(cursor),
            rolling: None,
        })
    }

    /// Next `(unit, plaintext)` pair in chronological order, or `None` at
    /// chain end.
    pub async fn next(&mut self) -> Result<Option<(ContentUnit, Bytes)>> {
        let cursor = self.cursor.as_mut().ok_or(StoreError::CursorClosed)?;

        let Some(unit) = cursor.next().await? else {
            return Ok(None);
        };

        let plain = match (unit.encoding, &self.rolling) {
            (Encoding::Diff, Some(previous)) => apply(previous, &unit.payload)?,
            // First yielded unit of a mid-chain start: pay one point
            // reconstruction to seed the rolling value.
            (Encoding::Diff, None) => reconstruct_unit(self.store.as_ref(), &unit).await?,
            (full, _) => decompress(&unit.payload, full)?,
        };

        if let Some(expected) = &unit.content_hash {
            if plaintext_hash(&plain) != *expected {
                return Err(ChainError::HashMismatch {
                    chain: unit.chain,
                    id: unit.id,
                });
            }
        }

        self.rolling = Some(plain.clone());
        Ok(Some((unit, plain)))
    }

    /// Release the underlying cursor's read scope.
    pub async fn close(mut self) -> Result<()> {
        if let Some(cursor) = self.cursor.take() {
            cursor.close().await?;
        }
        Ok(())
    }
}
