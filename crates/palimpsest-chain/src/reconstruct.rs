//! Point Reconstruction - Random-Access Decode of One Chain Position
//!
//! Most stored units are diffs, so reading one version means walking the
//! chain backwards to the nearest full unit and replaying patches forward:
//!
//! ```text
//! target (diff) ← diff ← diff ← keyframe (full)
//!                                   │ decompress
//!                                   ▼
//!                               plaintext ──apply──▶ ... ──apply──▶ target plaintext
//! ```
//!
//! The backward run is bounded by the keyframe interval the write pipelines
//! enforce, so a point read costs a small constant number of decode steps
//! regardless of chain length.
//!
//! ## Failure Semantics
//!
//! A diff unit whose predecessor cannot be resolved is a corrupt chain,
//! not a missing value: the walk fails with [`ChainError::Corrupt`]
//! rather than returning `None`. Readers that want optional semantics
//! should check unit existence first — a resolvable chain that decodes to
//! garbage must never be silently shortened.

use bytes::Bytes;
use palimpsest_core::{apply, decompress, Encoding};
use palimpsest_store::{ChainId, ChainStore, ContentUnit, UnitId};
use sha2::{Digest, Sha256};

use crate::{ChainError, Result};

/// Lowercase-hex SHA-256 of a plaintext, the integrity hash format the
/// write pipelines record.
pub fn plaintext_hash(plain: &[u8]) -> String {
    hex::encode(Sha256::digest(plain))
}

/// Reconstruct the plaintext of one unit by identity.
pub async fn reconstruct(
    store: &dyn ChainStore,
    chain: &ChainId,
    id: UnitId,
) -> Result<Bytes> {
    let unit = store
        .unit(chain, id)
        .await?
        .ok_or(palimpsest_store::StoreError::UnitNotFound {
            chain: *chain,
            id,
        })?;
    reconstruct_unit(store, &unit).await
}

/// Reconstruct the plaintext of an already-fetched unit.
pub async fn reconstruct_unit(store: &dyn ChainStore, unit: &ContentUnit) -> Result<Bytes> {
    let plain = if unit.encoding.is_full() {
        decompress(&unit.payload, unit.encoding)?
    } else {
        // Backward run: target, then every diff predecessor, ending at the
        // first full unit.
        let mut run = vec![unit.clone()];
        while run.last().expect("run starts non-empty").encoding == Encoding::Diff {
            let parent = resolve_parent(store, run.last().expect("run starts non-empty")).await?;
            run.push(parent);
        }

        let base = run.last().expect("run ends with the full unit");
        let mut plain = decompress(&base.payload, base.encoding)?;

        // Replay patches forward, oldest first.
        for diff_unit in run.iter().rev().skip(1) {
            plain = apply(&plain, &diff_unit.payload)?;
        }
        plain
    };

    if let Some(expected) = &unit.content_hash {
        if plaintext_hash(&plain) != *expected {
            return Err(ChainError::HashMismatch {
                chain: unit.chain,
                id: unit.id,
            });
        }
    }

    Ok(plain)
}

/// Resolve the predecessor a diff unit was encoded against.
///
/// Edit-history chains carry an explicit parent id; snapshot chains use
/// the chronologically previous unit. Either way, failure to resolve is
/// fatal corruption.
pub(crate) async fn resolve_parent(
    store: &dyn ChainStore,
    unit: &ContentUnit,
) -> Result<ContentUnit> {
    match unit.parent {
        Some(parent_id) => store.unit(&unit.chain, parent_id).await?.ok_or_else(|| {
            ChainError::Corrupt(format!(
                "diff unit {:?} in chain {:?} references missing parent {:?}",
                unit.id, unit.chain, parent_id
            ))
        }),
        None => store.predecessor(&unit.chain, unit.key).await?.ok_or_else(|| {
            ChainError::Corrupt(format!(
                "diff unit {:?} in chain {:?} has no chronological predecessor",
                unit.id, unit.chain
            ))
        }),
    }
}
