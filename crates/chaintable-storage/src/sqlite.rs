//! SQLite backend for the partitioned table store.
//!
//! Persists every logical table in one generic rows relation keyed by
//! `(table_name, partition_key, row_key)` with replace-semantics upserts and
//! ordered partition scans. Uses `sqlx` with WAL mode for concurrent read
//! performance.
//!
//! # Usage
//! ```rust,no_run
//! use chaintable_storage::sqlite::SqliteTableStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteTableStore::open("./tables.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteTableStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chaintable_core::error::IndexError;
use chaintable_core::store::{RowRange, TableRow, TableStore};

/// SQLite-backed partitioned table store.
pub struct SqliteTableStore {
    pool: SqlitePool,
}

impl SqliteTableStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./tables.db"`) or a full
    /// SQLite URL (`"sqlite:./tables.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| IndexError::Store(format!("sqlite connect: {e}")))?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. All data is lost when the pool drops.
    pub async fn in_memory() -> Result<Self, IndexError> {
        // A single connection keeps every caller on the same in-memory DB.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| IndexError::Store(format!("sqlite connect: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ct_tables (
                name TEXT PRIMARY KEY
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexError::Store(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ct_rows (
                table_name    TEXT NOT NULL,
                partition_key TEXT NOT NULL,
                row_key       TEXT NOT NULL,
                payload       TEXT NOT NULL,
                PRIMARY KEY (table_name, partition_key, row_key)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexError::Store(e.to_string()))?;

        debug!("SqliteTableStore schema initialized");
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, IndexError> {
        let row = sqlx::query("SELECT name FROM ct_tables WHERE name = ?")
            .bind(table)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn require_table(&self, table: &str) -> Result<(), IndexError> {
        if self.table_exists(table).await? {
            Ok(())
        } else {
            Err(IndexError::Store(format!("no such table: {table}")))
        }
    }

    fn parse_payload(text: &str) -> Result<serde_json::Value, IndexError> {
        serde_json::from_str(text).map_err(|e| IndexError::Corrupt(format!("stored payload: {e}")))
    }
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn create_table_if_absent(&self, table: &str) -> Result<(), IndexError> {
        sqlx::query("INSERT OR IGNORE INTO ct_tables (name) VALUES (?)")
            .bind(table)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> Result<(), IndexError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;
        sqlx::query("DELETE FROM ct_rows WHERE table_name = ?")
            .bind(table)
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;
        sqlx::query("DELETE FROM ct_tables WHERE name = ?")
            .bind(table)
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        table: &str,
        partition: &str,
        rows: Vec<TableRow>,
    ) -> Result<(), IndexError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.require_table(table).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;
        for row in rows {
            if row.partition_key != partition {
                return Err(IndexError::Store(format!(
                    "row {} not in partition {partition}",
                    row.row_key
                )));
            }
            let payload = serde_json::to_string(&row.payload)
                .map_err(|e| IndexError::Store(format!("serialize payload: {e}")))?;
            sqlx::query(
                "INSERT OR REPLACE INTO ct_rows
                    (table_name, partition_key, row_key, payload)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(table)
            .bind(partition)
            .bind(&row.row_key)
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexError::Store(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| IndexError::Store(format!("commit batch: {e}")))?;
        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        partition: &str,
        row_key: &str,
    ) -> Result<Option<TableRow>, IndexError> {
        self.require_table(table).await?;
        let row = sqlx::query(
            "SELECT payload FROM ct_rows
             WHERE table_name = ? AND partition_key = ? AND row_key = ?",
        )
        .bind(table)
        .bind(partition)
        .bind(row_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexError::Store(e.to_string()))?;

        match row {
            None => Ok(None),
            Some(r) => Ok(Some(TableRow {
                partition_key: partition.to_string(),
                row_key: row_key.to_string(),
                payload: Self::parse_payload(&r.get::<String, _>("payload"))?,
            })),
        }
    }

    async fn scan(
        &self,
        table: &str,
        partition: &str,
        range: RowRange,
    ) -> Result<Vec<TableRow>, IndexError> {
        self.require_table(table).await?;
        let rows = sqlx::query(
            "SELECT row_key, payload FROM ct_rows
             WHERE table_name = ? AND partition_key = ?
               AND (? IS NULL OR row_key >= ?)
               AND (? IS NULL OR row_key < ?)
             ORDER BY row_key ASC",
        )
        .bind(table)
        .bind(partition)
        .bind(&range.from)
        .bind(&range.from)
        .bind(&range.to)
        .bind(&range.to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexError::Store(e.to_string()))?;

        rows.iter()
            .map(|r| {
                Ok(TableRow {
                    partition_key: partition.to_string(),
                    row_key: r.get::<String, _>("row_key"),
                    payload: Self::parse_payload(&r.get::<String, _>("payload"))?,
                })
            })
            .collect()
    }
}
