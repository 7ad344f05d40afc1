//! Palimpsest Store - Backing-Store Contract for Content Chains
//!
//! This crate defines what the archive core needs from a storage backend
//! and ships two implementations of it:
//!
//! - [`SqliteChainStore`]: transactional, persistent, the serving-path
//!   backend
//! - [`MemoryChainStore`]: bulk-load-optimized, the mass-import and test
//!   backend
//!
//! The reconstruction and pipeline crates only ever see `Arc<dyn
//! ChainStore>`, so which backend is active is a deployment choice, not a
//! code path.
//!
//! ## What the Contract Covers
//!
//! - batched, atomic appends (the pipelines flush completed units in
//!   batches, not one transaction per unit)
//! - atomic payload rewrites (the chain mutator commits a whole cascaded
//!   tail or nothing)
//! - identity lookup, chronological predecessor lookup, tail scans
//! - forward chain cursors holding a read scope for their lifetime
//!
//! ## Usage
//!
//! ```ignore
//! use palimpsest_store::{ChainStore, MemoryChainStore, ChainId};
//!
//! let store: Arc<dyn ChainStore> = Arc::new(MemoryChainStore::new());
//! store.append_units(&batch).await?;
//!
//! let mut cursor = store.open_chain(&ChainId::source(42), None).await?;
//! while let Some(unit) = cursor.next().await? {
//!     // chronological order, snapshot-consistent
//! }
//! cursor.close().await?;
//! ```

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryChainStore;
pub use sqlite::SqliteChainStore;
pub use types::{ChainId, ContentUnit, Track, UnitId, UnitKey};

use async_trait::async_trait;

/// Backing-store contract for content chains.
///
/// Implementations must be `Send + Sync`; consumers share them as
/// `Arc<dyn ChainStore>` across worker tasks.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Insert a batch of new units atomically.
    ///
    /// Either every unit in the batch lands or none does. Fails with
    /// [`StoreError::DuplicateUnit`] if any unit's identity or
    /// chronological key already exists in its chain.
    async fn append_units(&self, units: &[ContentUnit]) -> Result<()>;

    /// Overwrite payload, encoding and parent of existing units atomically.
    ///
    /// Identity and chronological key are never touched — this is the
    /// commit path for cascaded re-diffs, which rewrite how a value is
    /// stored but not where it sits in the chain. Fails with
    /// [`StoreError::UnitNotFound`] if any target is missing, in which
    /// case nothing is written.
    async fn rewrite_units(&self, units: &[ContentUnit]) -> Result<()>;

    /// Fetch one unit by identity.
    async fn unit(&self, chain: &ChainId, id: UnitId) -> Result<Option<ContentUnit>>;

    /// Latest unit strictly before `before`, if any.
    ///
    /// This is the implicit predecessor lookup for snapshot chains, whose
    /// units carry no explicit parent reference.
    async fn predecessor(
        &self,
        chain: &ChainId,
        before: UnitKey,
    ) -> Result<Option<ContentUnit>>;

    /// Every unit strictly after `after`, in chronological order.
    async fn tail(&self, chain: &ChainId, after: UnitKey) -> Result<Vec<ContentUnit>>;

    /// The chronologically last unit of a chain, if any.
    async fn latest(&self, chain: &ChainId) -> Result<Option<ContentUnit>>;

    /// Open a forward cursor over a chain, starting at `from` (inclusive)
    /// or at the chain head.
    ///
    /// The cursor holds a read scope on the backing store until
    /// [`ChainCursor::close`] is called; consumption is forward-only and
    /// non-restartable.
    async fn open_chain(
        &self,
        chain: &ChainId,
        from: Option<UnitKey>,
    ) -> Result<Box<dyn ChainCursor>>;
}

/// Forward-only traversal of one chain.
#[async_trait]
pub trait ChainCursor: Send {
    /// Next unit in chronological order, or `None` at chain end.
    async fn next(&mut self) -> Result<Option<ContentUnit>>;

    /// Release the cursor's read scope.
    async fn close(self: Box<Self>) -> Result<()>;
}
