//! SQLite Chain Store - the Transactional Backend
//!
//! Persistent backend for the serving path: batched appends and cascaded
//! rewrites run inside one transaction each, and chain cursors hold a read
//! transaction for their whole traversal so a stream sees a consistent
//! snapshot even while the import pipelines keep writing.
//!
//! ## Schema
//!
//! One table, keyed by identity, with a unique chronological index per
//! chain (no two units of a chain may share a key):
//!
//! ```text
//! content_units (
//!     page_id, track, unit_id      -- identity (primary key)
//!     timestamp_ms, seq            -- chronological key (unique per chain)
//!     parent_id                    -- explicit predecessor, nullable
//!     encoding, payload            -- how and what is stored
//!     content_hash                 -- sha-256 of the plaintext, nullable
//! )
//! ```
//!
//! The schema is applied on connect; queries are runtime-bound so building
//! this crate needs no database.
//!
//! ## Usage
//!
//! ```ignore
//! // File-backed (production)
//! let store = SqliteChainStore::new("archive.db").await?;
//!
//! // In-memory (small tests; a single pooled connection, so close any
//! // open cursor before issuing further calls)
//! let store = SqliteChainStore::new_in_memory().await?;
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use palimpsest_core::Encoding;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;

use crate::{
    ChainCursor, ChainId, ChainStore, ContentUnit, Result, StoreError, Track, UnitId,
    UnitKey,
};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS content_units (
    page_id      INTEGER NOT NULL,
    track        INTEGER NOT NULL,
    unit_id      INTEGER NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    seq          INTEGER NOT NULL,
    parent_id    INTEGER,
    encoding     INTEGER NOT NULL,
    payload      BLOB NOT NULL,
    content_hash TEXT,
    PRIMARY KEY (page_id, track, unit_id)
)
"#;

const CREATE_KEY_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS content_units_chain_key
    ON content_units (page_id, track, timestamp_ms, seq)
"#;

/// Rows fetched per cursor page.
const CURSOR_PAGE: usize = 256;

/// Transactional SQLite backend.
pub struct SqliteChainStore {
    pool: SqlitePool,
}

impl SqliteChainStore {
    /// Open (or create) a file-backed store.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Create an in-memory store (for testing).
    ///
    /// Pinned to a single pooled connection that is never reaped:
    /// separate connections would each see their own empty memory
    /// database, and an idle-reaped connection would drop the data.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(pool).await?;
        sqlx::query(CREATE_KEY_INDEX).execute(pool).await?;
        Ok(())
    }
}

fn row_to_unit(row: &SqliteRow) -> Result<ContentUnit> {
    let page_id: i64 = row.try_get("page_id")?;
    let track: i64 = row.try_get("track")?;
    let unit_id: i64 = row.try_get("unit_id")?;
    let timestamp_ms: i64 = row.try_get("timestamp_ms")?;
    let seq: i64 = row.try_get("seq")?;
    let parent_id: Option<i64> = row.try_get("parent_id")?;
    let encoding_id: i64 = row.try_get("encoding")?;
    let payload: Vec<u8> = row.try_get("payload")?;
    let content_hash: Option<String> = row.try_get("content_hash")?;

    let encoding = Encoding::try_from(encoding_id as u16)
        .map_err(|_| StoreError::InvalidEncoding(encoding_id as u16))?;

    Ok(ContentUnit {
        chain: ChainId {
            page_id: page_id as u64,
            track: Track::from_i64(track),
        },
        id: UnitId(unit_id as u64),
        key: UnitKey::new(timestamp_ms, seq as u32),
        parent: parent_id.map(|id| UnitId(id as u64)),
        encoding,
        payload: Bytes::from(payload),
        content_hash,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

#[async_trait]
impl ChainStore for SqliteChainStore {
    async fn append_units(&self, units: &[ContentUnit]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for unit in units {
            let result = sqlx::query(
                r#"
                INSERT INTO content_units
                    (page_id, track, unit_id, timestamp_ms, seq, parent_id, encoding, payload, content_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(unit.chain.page_id as i64)
            .bind(unit.chain.track.to_i64())
            .bind(unit.id.0 as i64)
            .bind(unit.key.timestamp_ms)
            .bind(unit.key.seq as i64)
            .bind(unit.parent.map(|p| p.0 as i64))
            .bind(unit.encoding as u16 as i64)
            .bind(unit.payload.as_ref())
            .bind(unit.content_hash.as_deref())
            .execute(&mut *tx)
            .await;

            if let Err(e) = result {
                // Dropping the transaction rolls the whole batch back.
                if is_unique_violation(&e) {
                    return Err(StoreError::DuplicateUnit {
                        chain: unit.chain,
                        id: unit.id,
                        key: unit.key,
                    });
                }
                return Err(e.into());
            }
        }

        tx.commit().await?;
        tracing::debug!(units = units.len(), "appended unit batch");
        Ok(())
    }

    async fn rewrite_units(&self, units: &[ContentUnit]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for unit in units {
            let rows_affected = sqlx::query(
                r#"
                UPDATE content_units
                SET parent_id = ?, encoding = ?, payload = ?, content_hash = ?
                WHERE page_id = ? AND track = ? AND unit_id = ?
                "#,
            )
            .bind(unit.parent.map(|p| p.0 as i64))
            .bind(unit.encoding as u16 as i64)
            .bind(unit.payload.as_ref())
            .bind(unit.content_hash.as_deref())
            .bind(unit.chain.page_id as i64)
            .bind(unit.chain.track.to_i64())
            .bind(unit.id.0 as i64)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if rows_affected == 0 {
                return Err(StoreError::UnitNotFound {
                    chain: unit.chain,
                    id: unit.id,
                });
            }
        }

        tx.commit().await?;
        tracing::debug!(units = units.len(), "rewrote unit batch");
        Ok(())
    }

    async fn unit(&self, chain: &ChainId, id: UnitId) -> Result<Option<ContentUnit>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM content_units
            WHERE page_id = ? AND track = ? AND unit_id = ?
            "#,
        )
        .bind(chain.page_id as i64)
        .bind(chain.track.to_i64())
        .bind(id.0 as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_unit).transpose()
    }

    async fn predecessor(
        &self,
        chain: &ChainId,
        before: UnitKey,
    ) -> Result<Option<ContentUnit>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM content_units
            WHERE page_id = ? AND track = ?
              AND (timestamp_ms < ? OR (timestamp_ms = ? AND seq < ?))
            ORDER BY timestamp_ms DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(chain.page_id as i64)
        .bind(chain.track.to_i64())
        .bind(before.timestamp_ms)
        .bind(before.timestamp_ms)
        .bind(before.seq as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_unit).transpose()
    }

    async fn tail(&self, chain: &ChainId, after: UnitKey) -> Result<Vec<ContentUnit>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM content_units
            WHERE page_id = ? AND track = ?
              AND (timestamp_ms > ? OR (timestamp_ms = ? AND seq > ?))
            ORDER BY timestamp_ms ASC, seq ASC
            "#,
        )
        .bind(chain.page_id as i64)
        .bind(chain.track.to_i64())
        .bind(after.timestamp_ms)
        .bind(after.timestamp_ms)
        .bind(after.seq as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_unit).collect()
    }

    async fn latest(&self, chain: &ChainId) -> Result<Option<ContentUnit>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM content_units
            WHERE page_id = ? AND track = ?
            ORDER BY timestamp_ms DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(chain.page_id as i64)
        .bind(chain.track.to_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_unit).transpose()
    }

    async fn open_chain(
        &self,
        chain: &ChainId,
        from: Option<UnitKey>,
    ) -> Result<Box<dyn ChainCursor>> {
        // The cursor's read scope: a transaction held until close().
        let tx = self.pool.begin().await?;

        Ok(Box::new(SqliteCursor {
            tx: Some(tx),
            page_id: chain.page_id as i64,
            track: chain.track.to_i64(),
            // Positioned just before `from` so the first page fetch is
            // inclusive of it.
            after: from
                .map(|key| position_before(key))
                .unwrap_or((i64::MIN, i64::MIN)),
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }
}

/// The strict-greater-than resume position that makes a paged `> after`
/// scan start at `key` inclusively.
fn position_before(key: UnitKey) -> (i64, i64) {
    match key.seq {
        0 => (key.timestamp_ms - 1, i64::MAX),
        seq => (key.timestamp_ms, seq as i64 - 1),
    }
}

struct SqliteCursor {
    tx: Option<sqlx::Transaction<'static, sqlx::Sqlite>>,
    page_id: i64,
    track: i64,
    /// Resume position: the last (timestamp_ms, seq) already yielded.
    after: (i64, i64),
    buffer: VecDeque<ContentUnit>,
    exhausted: bool,
}

#[async_trait]
impl ChainCursor for SqliteCursor {
    async fn next(&mut self) -> Result<Option<ContentUnit>> {
        if let Some(unit) = self.buffer.pop_front() {
            return Ok(Some(unit));
        }
        if self.exhausted {
            return Ok(None);
        }

        let tx = self.tx.as_mut().ok_or(StoreError::CursorClosed)?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM content_units
            WHERE page_id = ? AND track = ?
              AND (timestamp_ms > ? OR (timestamp_ms = ? AND seq > ?))
            ORDER BY timestamp_ms ASC, seq ASC
            LIMIT ?
            "#,
        )
        .bind(self.page_id)
        .bind(self.track)
        .bind(self.after.0)
        .bind(self.after.0)
        .bind(self.after.1)
        .bind(CURSOR_PAGE as i64)
        .fetch_all(&mut **tx)
        .await?;

        if rows.len() < CURSOR_PAGE {
            self.exhausted = true;
        }

        for row in &rows {
            self.buffer.push_back(row_to_unit(row)?);
        }

        if let Some(last) = self.buffer.back() {
            self.after = (last.key.timestamp_ms, last.key.seq as i64);
        }

        Ok(self.buffer.pop_front())
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            // Read-only scope; commit just releases it.
            tx.commit().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(chain: ChainId, id: u64, ts: i64, seq: u32, payload: &str) -> ContentUnit {
        ContentUnit {
            chain,
            id: UnitId(id),
            key: UnitKey::new(ts, seq),
            parent: (id > 1).then(|| UnitId(id - 1)),
            encoding: Encoding::Raw,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
            content_hash: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_roundtrip_fields() {
        let store = SqliteChainStore::new_in_memory().await.unwrap();
        let chain = ChainId::tier(7, 2);

        let mut written = unit(chain, 3, 1700000000000, 4, "rendered html");
        written.content_hash = Some("ab".repeat(32));
        store.append_units(&[written.clone()]).await.unwrap();

        let read = store.unit(&chain, UnitId(3)).await.unwrap().unwrap();
        assert_eq!(read, written);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let store = SqliteChainStore::new_in_memory().await.unwrap();
        let chain = ChainId::source(1);
        store
            .append_units(&[unit(chain, 1, 100, 0, "a")])
            .await
            .unwrap();

        // Same chronological key, different identity.
        let err = store
            .append_units(&[unit(chain, 2, 100, 0, "b")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUnit { .. }));
    }

    #[tokio::test]
    async fn test_predecessor_latest_tail() {
        let store = SqliteChainStore::new_in_memory().await.unwrap();
        let chain = ChainId::source(1);
        store
            .append_units(&[
                unit(chain, 1, 100, 0, "a"),
                unit(chain, 2, 200, 1, "b"),
                unit(chain, 3, 200, 2, "c"),
            ])
            .await
            .unwrap();

        let prev = store
            .predecessor(&chain, UnitKey::new(200, 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prev.id, UnitId(2));

        let latest = store.latest(&chain).await.unwrap().unwrap();
        assert_eq!(latest.id, UnitId(3));

        let tail = store.tail(&chain, UnitKey::new(100, 0)).await.unwrap();
        assert_eq!(
            tail.iter().map(|u| u.id).collect::<Vec<_>>(),
            vec![UnitId(2), UnitId(3)]
        );
    }

    #[tokio::test]
    async fn test_rewrite_all_or_nothing() {
        let store = SqliteChainStore::new_in_memory().await.unwrap();
        let chain = ChainId::source(1);
        store
            .append_units(&[unit(chain, 1, 100, 0, "a"), unit(chain, 2, 200, 1, "b")])
            .await
            .unwrap();

        let mut ok = store.unit(&chain, UnitId(2)).await.unwrap().unwrap();
        ok.payload = Bytes::from_static(b"rewritten");
        let mut missing = ok.clone();
        missing.id = UnitId(42);

        let err = store.rewrite_units(&[ok, missing]).await.unwrap_err();
        assert!(matches!(err, StoreError::UnitNotFound { .. }));

        let untouched = store.unit(&chain, UnitId(2)).await.unwrap().unwrap();
        assert_eq!(untouched.payload, Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_cursor_pages_through_large_chain() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteChainStore::new(dir.path().join("archive.db"))
            .await
            .unwrap();
        let chain = ChainId::source(1);

        // Three cursor pages' worth of units.
        let units: Vec<ContentUnit> = (0..(CURSOR_PAGE as u64 * 2 + 10))
            .map(|i| unit(chain, i + 1, 1000 + i as i64, i as u32, "payload"))
            .collect();
        store.append_units(&units).await.unwrap();

        let mut cursor = store.open_chain(&chain, None).await.unwrap();
        let mut seen = 0u64;
        while let Some(read) = cursor.next().await.unwrap() {
            assert_eq!(read.id, UnitId(seen + 1));
            seen += 1;
        }
        assert_eq!(seen, units.len() as u64);
        cursor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_from_position_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteChainStore::new(dir.path().join("archive.db"))
            .await
            .unwrap();
        let chain = ChainId::source(1);
        store
            .append_units(&[
                unit(chain, 1, 100, 0, "a"),
                unit(chain, 2, 200, 0, "b"),
                unit(chain, 3, 300, 0, "c"),
            ])
            .await
            .unwrap();

        let mut cursor = store
            .open_chain(&chain, Some(UnitKey::new(200, 0)))
            .await
            .unwrap();
        assert_eq!(cursor.next().await.unwrap().unwrap().id, UnitId(2));
        assert_eq!(cursor.next().await.unwrap().unwrap().id, UnitId(3));
        assert!(cursor.next().await.unwrap().is_none());
        cursor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_holds_snapshot_against_writers() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteChainStore::new(dir.path().join("archive.db"))
            .await
            .unwrap();
        let chain = ChainId::source(1);
        store
            .append_units(&[unit(chain, 1, 100, 0, "a")])
            .await
            .unwrap();

        let mut cursor = store.open_chain(&chain, None).await.unwrap();
        // Force the cursor's transaction to take its read snapshot now.
        assert_eq!(cursor.next().await.unwrap().unwrap().id, UnitId(1));

        store
            .append_units(&[unit(chain, 2, 200, 0, "b")])
            .await
            .unwrap();

        // The concurrent append is invisible to the open scope.
        assert!(cursor.next().await.unwrap().is_none());
        cursor.close().await.unwrap();

        assert!(store.unit(&chain, UnitId(2)).await.unwrap().is_some());
    }
}
