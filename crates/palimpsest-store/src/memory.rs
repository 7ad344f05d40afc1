//! In-Memory Chain Store - the Bulk-Load Backend
//!
//! A full dump import writes tens of millions of units; paying a
//! transaction per batch on the serving backend while importing is wasted
//! work when the whole store can be rebuilt from the dump anyway. This
//! backend keeps every chain in an ordered map behind one `RwLock`, making
//! appends a lock-and-insert and chronological scans a range walk.
//!
//! It doubles as the test backend — every integration test that doesn't
//! specifically exercise SQLite runs against this store.
//!
//! ## Cursor Semantics
//!
//! `open_chain` snapshots the requested range at open time. That is the
//! read-scope guarantee the contract asks for: a traversal sees the chain
//! as it was when the cursor opened, regardless of concurrent appends.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    ChainCursor, ChainId, ChainStore, ContentUnit, Result, StoreError, UnitId, UnitKey,
};

#[derive(Default)]
struct ChainSlot {
    /// Units ordered by chronological key.
    by_key: BTreeMap<(i64, u32), ContentUnit>,
    /// Identity index into `by_key`.
    by_id: HashMap<UnitId, UnitKey>,
}

/// Bulk-load-optimized in-memory backend.
#[derive(Default)]
pub struct MemoryChainStore {
    chains: Arc<RwLock<HashMap<ChainId, ChainSlot>>>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units currently held, across all chains.
    pub async fn unit_count(&self) -> usize {
        self.chains
            .read()
            .await
            .values()
            .map(|slot| slot.by_key.len())
            .sum()
    }
}

#[async_trait]
impl ChainStore for MemoryChainStore {
    async fn append_units(&self, units: &[ContentUnit]) -> Result<()> {
        let mut chains = self.chains.write().await;

        // Validate the whole batch before touching anything, so a rejected
        // batch leaves the store unchanged.
        for unit in units {
            if let Some(slot) = chains.get(&unit.chain) {
                let key = (unit.key.timestamp_ms, unit.key.seq);
                if slot.by_id.contains_key(&unit.id) || slot.by_key.contains_key(&key) {
                    return Err(StoreError::DuplicateUnit {
                        chain: unit.chain,
                        id: unit.id,
                        key: unit.key,
                    });
                }
            }
        }

        for unit in units {
            let slot = chains.entry(unit.chain).or_default();
            slot.by_id.insert(unit.id, unit.key);
            slot.by_key
                .insert((unit.key.timestamp_ms, unit.key.seq), unit.clone());
        }

        Ok(())
    }

    async fn rewrite_units(&self, units: &[ContentUnit]) -> Result<()> {
        let mut chains = self.chains.write().await;

        for unit in units {
            let found = chains
                .get(&unit.chain)
                .and_then(|slot| slot.by_id.get(&unit.id))
                .is_some();
            if !found {
                return Err(StoreError::UnitNotFound {
                    chain: unit.chain,
                    id: unit.id,
                });
            }
        }

        for unit in units {
            let slot = chains.get_mut(&unit.chain).expect("validated above");
            let key = slot.by_id[&unit.id];
            let stored = slot
                .by_key
                .get_mut(&(key.timestamp_ms, key.seq))
                .expect("id index points at stored unit");
            stored.payload = unit.payload.clone();
            stored.encoding = unit.encoding;
            stored.parent = unit.parent;
            stored.content_hash = unit.content_hash.clone();
        }

        Ok(())
    }

    async fn unit(&self, chain: &ChainId, id: UnitId) -> Result<Option<ContentUnit>> {
        let chains = self.chains.read().await;
        Ok(chains.get(chain).and_then(|slot| {
            let key = slot.by_id.get(&id)?;
            slot.by_key.get(&(key.timestamp_ms, key.seq)).cloned()
        }))
    }

    async fn predecessor(
        &self,
        chain: &ChainId,
        before: UnitKey,
    ) -> Result<Option<ContentUnit>> {
        let chains = self.chains.read().await;
        Ok(chains.get(chain).and_then(|slot| {
            slot.by_key
                .range(..(before.timestamp_ms, before.seq))
                .next_back()
                .map(|(_, unit)| unit.clone())
        }))
    }

    async fn tail(&self, chain: &ChainId, after: UnitKey) -> Result<Vec<ContentUnit>> {
        let chains = self.chains.read().await;
        Ok(chains
            .get(chain)
            .map(|slot| {
                slot.by_key
                    .range((
                        std::ops::Bound::Excluded((after.timestamp_ms, after.seq)),
                        std::ops::Bound::Unbounded,
                    ))
                    .map(|(_, unit)| unit.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest(&self, chain: &ChainId) -> Result<Option<ContentUnit>> {
        let chains = self.chains.read().await;
        Ok(chains
            .get(chain)
            .and_then(|slot| slot.by_key.values().next_back().cloned()))
    }

    async fn open_chain(
        &self,
        chain: &ChainId,
        from: Option<UnitKey>,
    ) -> Result<Box<dyn ChainCursor>> {
        let chains = self.chains.read().await;
        let units: Vec<ContentUnit> = chains
            .get(chain)
            .map(|slot| match from {
                Some(from) => slot
                    .by_key
                    .range((from.timestamp_ms, from.seq)..)
                    .map(|(_, unit)| unit.clone())
                    .collect(),
                None => slot.by_key.values().cloned().collect(),
            })
            .unwrap_or_default();

        Ok(Box::new(SnapshotCursor {
            units: units.into_iter(),
            closed: false,
        }))
    }
}

struct SnapshotCursor {
    units: std::vec::IntoIter<ContentUnit>,
    closed: bool,
}

#[async_trait]
impl ChainCursor for SnapshotCursor {
    async fn next(&mut self) -> Result<Option<ContentUnit>> {
        if self.closed {
            return Err(StoreError::CursorClosed);
        }
        Ok(self.units.next())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
