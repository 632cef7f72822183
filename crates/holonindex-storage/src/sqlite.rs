//! SQLite storage backend.
//!
//! Persists entities, watched sources, quarantines, block hashes, the
//! confirmed watermark and checkpoints to a single SQLite file. Entities are stored as JSON
//! payloads keyed by `(kind, id)`. Uses `sqlx` with WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use holonindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./holons.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use holonindex_core::checkpoint::{Checkpoint, CheckpointStore};
use holonindex_core::entity::{
    Entity, EntityId, EntityKind, QuarantinedSource, TemplateKind, WatchedSource,
};
use holonindex_core::error::IndexerError;
use holonindex_core::store::{
    resolve_write, CommitSummary, EntityReader, EntityStore, RollbackSummary, WriteAction,
    WriteBatch,
};

const CONFIRMED_KEY: &str = "confirmed_block";

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn parse_address(s: &str) -> Result<Address, IndexerError> {
    s.parse::<Address>()
        .map_err(|e| IndexerError::Storage(format!("invalid stored address '{s}': {e}")))
}

fn parse_hash(s: &str) -> Result<B256, IndexerError> {
    s.parse::<B256>()
        .map_err(|e| IndexerError::Storage(format!("invalid stored hash '{s}': {e}")))
}

/// SQLite-backed entity store for one chain.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./holons.db"`) or a full
    /// SQLite URL (`"sqlite:./holons.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` is its own database, so the pool
    /// is limited to one connection.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS entities (
                kind         TEXT    NOT NULL,
                id           BLOB    NOT NULL,
                block_number INTEGER NOT NULL,
                payload      TEXT    NOT NULL,
                PRIMARY KEY (kind, id)
            );",
            "CREATE INDEX IF NOT EXISTS idx_entities_block ON entities (kind, block_number);",
            "CREATE TABLE IF NOT EXISTS watched_sources (
                address             TEXT    PRIMARY KEY,
                template_kind       TEXT    NOT NULL,
                registered_at_block INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS quarantined_sources (
                address              TEXT    PRIMARY KEY,
                quarantined_at_block INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS block_hashes (
                block_number INTEGER PRIMARY KEY,
                block_hash   TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT    PRIMARY KEY,
                value INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS checkpoints (
                chain_id     TEXT    NOT NULL,
                indexer_id   TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (chain_id, indexer_id)
            );",
        ];
        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Number of stored entities of `kind`.
    pub async fn count(&self, kind: EntityKind) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM entities WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

fn decode_entity(payload: &str) -> Result<Entity, IndexerError> {
    serde_json::from_str(payload)
        .map_err(|e| IndexerError::Storage(format!("corrupt entity payload: {e}")))
}

// ─── EntityStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl EntityReader for SqliteStorage {
    async fn get(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Entity>, IndexerError> {
        let row = sqlx::query("SELECT payload FROM entities WHERE kind = ? AND id = ?")
            .bind(kind.as_str())
            .bind(id.as_bytes())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| decode_entity(&r.get::<String, _>("payload")))
            .transpose()
    }
}

#[async_trait]
impl EntityStore for SqliteStorage {
    async fn upsert_transaction(&self, batch: WriteBatch) -> Result<CommitSummary, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut summary = CommitSummary::default();

        // Any early return drops `tx`, which rolls the batch back.
        for entity in &batch.entities {
            let kind = entity.kind();
            let id = entity.id();
            let row = sqlx::query("SELECT payload FROM entities WHERE kind = ? AND id = ?")
                .bind(kind.as_str())
                .bind(id.as_bytes())
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_err)?;
            let existing = row
                .map(|r| decode_entity(&r.get::<String, _>("payload")))
                .transpose()?;

            match resolve_write(existing.as_ref(), entity)? {
                WriteAction::Insert => {
                    let payload = serde_json::to_string(entity).map_err(storage_err)?;
                    sqlx::query(
                        "INSERT INTO entities (kind, id, block_number, payload)
                         VALUES (?, ?, ?, ?)",
                    )
                    .bind(kind.as_str())
                    .bind(id.as_bytes())
                    .bind(to_i64(entity.block_number()))
                    .bind(&payload)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage_err)?;
                    summary.inserted += 1;
                }
                WriteAction::Skip => summary.unchanged += 1,
            }
        }

        for source in &batch.sources {
            sqlx::query(
                "INSERT OR IGNORE INTO watched_sources (address, template_kind, registered_at_block)
                 VALUES (?, ?, ?)",
            )
            .bind(format!("{:#x}", source.address))
            .bind(source.template_kind.as_str())
            .bind(to_i64(source.registered_at_block))
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(summary)
    }

    async fn delete_after(&self, block_number: u64) -> Result<RollbackSummary, IndexerError> {
        let bound = to_i64(block_number);
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let entities = sqlx::query("DELETE FROM entities WHERE block_number > ?")
            .bind(bound)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
        let sources = sqlx::query("DELETE FROM watched_sources WHERE registered_at_block > ?")
            .bind(bound)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
        sqlx::query("DELETE FROM quarantined_sources WHERE quarantined_at_block > ?")
            .bind(bound)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        let block_hashes = sqlx::query("DELETE FROM block_hashes WHERE block_number > ?")
            .bind(bound)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
        sqlx::query("UPDATE meta SET value = ? WHERE key = ? AND value > ?")
            .bind(bound)
            .bind(CONFIRMED_KEY)
            .bind(bound)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        debug!(block_number, entities, sources, block_hashes, "rolled back storage");
        Ok(RollbackSummary {
            entities: entities as usize,
            sources: sources as usize,
            block_hashes: block_hashes as usize,
        })
    }

    async fn clear(&self) -> Result<RollbackSummary, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut removed = [0u64; 3];
        for (slot, table) in ["entities", "watched_sources", "block_hashes"].iter().enumerate() {
            removed[slot] = sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
                .rows_affected();
        }
        sqlx::query("DELETE FROM quarantined_sources")
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        sqlx::query("DELETE FROM meta WHERE key = ?")
            .bind(CONFIRMED_KEY)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;

        let [entities, sources, block_hashes] = removed;
        debug!(entities, sources, block_hashes, "cleared storage");
        Ok(RollbackSummary {
            entities: entities as usize,
            sources: sources as usize,
            block_hashes: block_hashes as usize,
        })
    }

    async fn entities_in_range(
        &self,
        kind: EntityKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<Entity>, IndexerError> {
        let rows = sqlx::query(
            "SELECT payload FROM entities
             WHERE kind = ? AND block_number BETWEEN ? AND ?
             ORDER BY block_number, id",
        )
        .bind(kind.as_str())
        .bind(to_i64(from))
        .bind(to_i64(to))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| decode_entity(&r.get::<String, _>("payload")))
            .collect()
    }

    async fn watched_sources(&self) -> Result<Vec<WatchedSource>, IndexerError> {
        let rows = sqlx::query(
            "SELECT address, template_kind, registered_at_block FROM watched_sources
             ORDER BY registered_at_block, address",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let address: String = row.get("address");
            let kind: String = row.get("template_kind");
            out.push(WatchedSource {
                address: parse_address(&address)?,
                template_kind: TemplateKind::from_str_name(&kind).ok_or_else(|| {
                    IndexerError::Storage(format!("unknown template kind '{kind}'"))
                })?,
                registered_at_block: row.get::<i64, _>("registered_at_block") as u64,
            });
        }
        Ok(out)
    }

    async fn quarantine_source(&self, source: QuarantinedSource) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR IGNORE INTO quarantined_sources (address, quarantined_at_block)
             VALUES (?, ?)",
        )
        .bind(format!("{:#x}", source.address))
        .bind(to_i64(source.quarantined_at_block))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn quarantined_sources(&self) -> Result<Vec<QuarantinedSource>, IndexerError> {
        let rows = sqlx::query(
            "SELECT address, quarantined_at_block FROM quarantined_sources
             ORDER BY quarantined_at_block, address",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| {
                Ok(QuarantinedSource {
                    address: parse_address(&r.get::<String, _>("address"))?,
                    quarantined_at_block: r.get::<i64, _>("quarantined_at_block") as u64,
                })
            })
            .collect()
    }

    async fn insert_block_hash(&self, block_number: u64, hash: B256) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR REPLACE INTO block_hashes (block_number, block_hash) VALUES (?, ?)")
            .bind(to_i64(block_number))
            .bind(format!("{hash:#x}"))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn block_hash(&self, block_number: u64) -> Result<Option<B256>, IndexerError> {
        let row = sqlx::query("SELECT block_hash FROM block_hashes WHERE block_number = ?")
            .bind(to_i64(block_number))
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| parse_hash(&r.get::<String, _>("block_hash")))
            .transpose()
    }

    async fn block_hashes_since(&self, from: u64) -> Result<Vec<(u64, B256)>, IndexerError> {
        let rows = sqlx::query(
            "SELECT block_number, block_hash FROM block_hashes
             WHERE block_number >= ? ORDER BY block_number",
        )
        .bind(to_i64(from))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| {
                let hash = parse_hash(&r.get::<String, _>("block_hash"))?;
                Ok((r.get::<i64, _>("block_number") as u64, hash))
            })
            .collect()
    }

    async fn confirmed_block(&self) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = ?")
            .bind(CONFIRMED_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<i64, _>("value") as u64))
    }

    async fn set_confirmed_block(&self, block_number: u64) -> Result<(), IndexerError> {
        sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)")
            .bind(CONFIRMED_KEY)
            .bind(to_i64(block_number))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT chain_id, indexer_id, block_number, block_hash, updated_at
             FROM checkpoints WHERE chain_id = ? AND indexer_id = ?",
        )
        .bind(chain_id)
        .bind(indexer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(|r| {
            Ok(Checkpoint {
                chain_id: r.get("chain_id"),
                indexer_id: r.get("indexer_id"),
                block_number: r.get::<i64, _>("block_number") as u64,
                block_hash: parse_hash(&r.get::<String, _>("block_hash"))?,
                updated_at: r.get("updated_at"),
            })
        })
        .transpose()
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (chain_id, indexer_id, block_number, block_hash, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.chain_id)
        .bind(&checkpoint.indexer_id)
        .bind(to_i64(checkpoint.block_number))
        .bind(format!("{:#x}", checkpoint.block_hash))
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            chain_id = %checkpoint.chain_id,
            indexer_id = %checkpoint.indexer_id,
            block = checkpoint.block_number,
            "checkpoint saved"
        );
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
