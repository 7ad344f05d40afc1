//! Chain Sequencer - Single-Threaded Keyframe and Finality Bookkeeping
//!
//! Whether a unit becomes a keyframe, and whether it closes out its chain,
//! are decisions that depend on submission order — exactly the kind of
//! mutable state that must not be shared across worker threads. All of it
//! lives here, owned by the one staging task that feeds the worker pool.
//! Workers only ever see the immutable [`StagedTask`] they are handed.
//!
//! ## Why Dispatch Lags One Submission
//!
//! Whether a just-submitted unit is the *last* unit of its chain is only
//! knowable when the next submission (or end of stream) arrives. So the
//! sequencer holds exactly one staged task: staging the next submission
//! releases the previous one, retroactively marked final — and, when
//! tail-sealing is on, retroactively forced to a full keyframe so the
//! chain's most-read version decodes in O(1).
//!
//! ## Keyframe Cadence
//!
//! One counter per chain, keyed by owner, so interleaved submissions from
//! other chains never disturb a chain's own cadence:
//!
//! - first unit of a chain: keyframe (a chain head has no predecessor to
//!   diff against)
//! - every `interval`-th diff unit after a keyframe: keyframe, counter
//!   resets
//! - sealed tail unit: keyframe, counter resets

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use palimpsest_store::{ChainId, UnitId};

/// A task released for dispatch, with its scheduling decisions locked in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StagedTask<T> {
    pub task: T,
    pub chain: ChainId,
    /// Store this unit full rather than as a diff.
    pub keyframe: bool,
    /// Identity of the chain's previous unit, `None` at the chain head.
    pub prev: Option<UnitId>,
    /// No later unit of this chain follows in the stream.
    pub chain_final: bool,
}

pub(crate) struct ChainSequencer<T> {
    interval: u32,
    seal_tails: bool,
    /// Diff units since the last keyframe, per chain.
    counters: HashMap<ChainId, u32>,
    /// Last submitted unit id, per chain.
    last_ids: HashMap<ChainId, UnitId>,
    staged: Option<StagedTask<T>>,
}

impl<T> ChainSequencer<T> {
    pub fn new(interval: u32, seal_tails: bool) -> Self {
        Self {
            interval,
            seal_tails,
            counters: HashMap::new(),
            last_ids: HashMap::new(),
            staged: None,
        }
    }

    /// Stage a submission; returns the previously staged task, now ready
    /// for dispatch.
    pub fn stage(&mut self, chain: ChainId, id: UnitId, task: T) -> Option<StagedTask<T>> {
        let keyframe = self.classify(chain);
        let prev = self.last_ids.insert(chain, id);

        let released = self.release(Some(chain));
        self.staged = Some(StagedTask {
            task,
            chain,
            keyframe,
            prev,
            chain_final: false,
        });
        released
    }

    /// End of stream: release the last staged task as its chain's final
    /// unit.
    pub fn finish(&mut self) -> Option<StagedTask<T>> {
        self.release(None)
    }

    fn classify(&mut self, chain: ChainId) -> bool {
        match self.counters.entry(chain) {
            // Never seen: the chain head is always a keyframe.
            Entry::Vacant(slot) => {
                slot.insert(0);
                true
            }
            Entry::Occupied(mut slot) => {
                let counter = slot.get_mut();
                *counter += 1;
                if *counter >= self.interval {
                    *counter = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn release(&mut self, incoming_chain: Option<ChainId>) -> Option<StagedTask<T>> {
        let mut staged = self.staged.take()?;

        if incoming_chain != Some(staged.chain) {
            staged.chain_final = true;
            if self.seal_tails && !staged.keyframe {
                staged.keyframe = true;
                self.counters.insert(staged.chain, 0);
            }
        }

        Some(staged)
    }
}
