//! Out-of-Order Rewrites with Cascading Re-Diff
//!
//! Appending to a chain is cheap. Editing the *middle* of one is not:
//! every diff unit after the edited position was encoded against a value
//! that just changed, so its stored patch no longer reproduces its
//! logical content. This module rewrites the edited unit and re-bases the
//! affected tail so that every later unit still decodes to exactly the
//! value it decoded to before.
//!
//! ## Algorithm
//!
//! 1. Reconstruct the plaintext of the unit immediately preceding the
//!    target. If there is none, the new value is stored as a full
//!    keyframe; otherwise as a diff against that predecessor.
//! 2. Walk the tail in chronological order with a rolling `wanderer`
//!    plaintext, initialized to the new value. For each diff unit: decode
//!    its current (old) value, re-diff that old value against the
//!    wanderer, and advance the wanderer to the old value — so the next
//!    tail unit re-bases against the value chain it always had.
//! 3. The cascade stops at the first full unit in the tail: a keyframe's
//!    stored value does not depend on its predecessor, so it and
//!    everything after it are untouched. This also keeps the keyframe
//!    spacing (and with it the point-read cost bound) intact.
//!
//! A unit that was stored full keeps a full encoding for its new value,
//! for the same reason.
//!
//! ## Failure Semantics
//!
//! All rewritten units are staged in memory and committed in one atomic
//! store call. An unresolvable predecessor or a corrupt tail unit aborts
//! the whole mutation with nothing written; callers retry the full
//! operation.
//!
//! ## Concurrency Precondition
//!
//! One writer per chain. Two concurrent mutations of the same chain are
//! not supported — coordination belongs to the caller, the way a dump
//! importer already serializes work per page.

use bytes::Bytes;
use palimpsest_core::{apply, compress, diff, Encoding};
use palimpsest_store::{ChainId, ChainStore, ContentUnit, Track, UnitId};
use tracing::debug;

use crate::reconstruct::{plaintext_hash, reconstruct_unit};
use crate::Result;

/// What a completed rewrite touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// Tail units whose stored encoding was re-based.
    pub tail_rewritten: usize,
}

/// Replace the logical value at one chain position, re-basing the tail so
/// every later unit still decodes to its original value.
///
/// `full_encoding` is used when the target must become a keyframe but its
/// previous encoding was a diff (a first-of-chain rewrite).
pub async fn rewrite_value(
    store: &dyn ChainStore,
    chain: &ChainId,
    id: UnitId,
    new_plain: &[u8],
    full_encoding: Encoding,
) -> Result<RewriteOutcome> {
    let target = store
        .unit(chain, id)
        .await?
        .ok_or(palimpsest_store::StoreError::UnitNotFound { chain: *chain, id })?;

    let predecessor = store.predecessor(chain, target.key).await?;

    // The tail decodes against the target's *old* value; capture it before
    // staging anything.
    let old_target_plain = reconstruct_unit(store, &target).await?;

    let mut staged = Vec::new();
    staged.push(encode_target(&target, predecessor.as_ref(), store, new_plain, full_encoding).await?);

    // Cascade: re-base diff tail units against the evolving wanderer.
    let mut wanderer = Bytes::copy_from_slice(new_plain);
    let mut old_rolling = old_target_plain;
    let mut previous_id = target.id;

    for tail_unit in store.tail(chain, target.key).await? {
        if tail_unit.encoding.is_full() {
            // A keyframe does not depend on its predecessor; the cascade
            // ends here.
            break;
        }

        let old_plain = apply(&old_rolling, &tail_unit.payload)?;

        let mut rebased = tail_unit.clone();
        rebased.encoding = Encoding::Diff;
        rebased.payload = diff(&wanderer, &old_plain)?;
        rebased.parent = explicit_parent(chain, previous_id);
        rebased.content_hash = Some(plaintext_hash(&old_plain));
        staged.push(rebased);

        previous_id = tail_unit.id;
        wanderer = old_plain.clone();
        old_rolling = old_plain;
    }

    let tail_rewritten = staged.len() - 1;
    store.rewrite_units(&staged).await?;

    debug!(
        page_id = chain.page_id,
        unit_id = id.0,
        tail_rewritten,
        "rewrote chain value"
    );

    Ok(RewriteOutcome { tail_rewritten })
}

/// Stage the new encoding of the edited unit itself.
async fn encode_target(
    target: &ContentUnit,
    predecessor: Option<&ContentUnit>,
    store: &dyn ChainStore,
    new_plain: &[u8],
    full_encoding: Encoding,
) -> Result<ContentUnit> {
    let mut staged = target.clone();
    staged.content_hash = Some(plaintext_hash(new_plain));

    match predecessor {
        None => {
            // First of its chain: must stay a keyframe.
            let encoding = if target.encoding.is_full() {
                target.encoding
            } else {
                full_encoding
            };
            staged.encoding = encoding;
            staged.payload = compress(new_plain, encoding)?;
            staged.parent = None;
        }
        Some(prev) => {
            if target.encoding.is_full() {
                // Preserve keyframe spacing: a full unit stays full.
                staged.payload = compress(new_plain, target.encoding)?;
            } else {
                let prev_plain = reconstruct_unit(store, prev).await?;
                staged.encoding = Encoding::Diff;
                staged.payload = diff(&prev_plain, new_plain)?;
                staged.parent = explicit_parent(&target.chain, prev.id);
            }
        }
    }

    Ok(staged)
}

/// Edit-history chains carry explicit parent ids; snapshot chains stay
/// implicit.
fn explicit_parent(chain: &ChainId, parent: UnitId) -> Option<UnitId> {
    match chain.track {
        Track::Source => Some(parent),
        Track::Tier(_) => None,
    }
}
