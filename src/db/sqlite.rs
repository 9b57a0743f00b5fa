use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use super::{
    Document, DocumentStore, Query, StoreError, StoreResult, WriteBatch, WriteOp, MAX_DOCUMENT_BYTES,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    version INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);
";

/// JSON documents in a single SQLite table behind an r2d2 pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
        });
        let pool = Pool::builder()
            .max_size(10)
            .connection_timeout(Duration::from_secs(60))
            .build(manager)
            .map_err(|e| StoreError::Unavailable(format!("failed to create DB pool: {}", e)))?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory store; every handle shares the same data.
    pub fn open_in_memory() -> StoreResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory())
            .map_err(|e| StoreError::Unavailable(format!("failed to create DB pool: {}", e)))?;
        let store = Self { pool };
        store.create_schema_blocking()?;
        Ok(store)
    }

    pub async fn create_schema(&self) -> StoreResult<()> {
        self.with_conn(|conn| conn.execute_batch(SCHEMA).map_err(StoreError::from))
            .await
    }

    fn create_schema_blocking(&self) -> StoreResult<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {}", e)))?
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::Unavailable(e.to_string())
            }
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

fn encode_checked(collection: &str, id: &str, data: &Value) -> StoreResult<String> {
    let text = serde_json::to_string(data)?;
    if text.len() > MAX_DOCUMENT_BYTES {
        return Err(StoreError::DocumentTooLarge {
            collection: collection.to_string(),
            id: id.to_string(),
            size: text.len(),
            limit: MAX_DOCUMENT_BYTES,
        });
    }
    Ok(text)
}

fn read_row(conn: &Connection, collection: &str, id: &str) -> StoreResult<Option<(u64, String)>> {
    let row = conn
        .query_row(
            "SELECT version, data FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()?;
    Ok(row.map(|(v, d)| (v as u64, d)))
}

fn check_version(collection: &str, id: &str, expected: Option<u64>, actual: u64) -> StoreResult<()> {
    match expected {
        Some(v) if v != actual => Err(StoreError::Conflict(format!(
            "{}/{} is at version {}, expected {}",
            collection, id, actual, v
        ))),
        _ => Ok(()),
    }
}

fn apply_op(conn: &Connection, op: WriteOp) -> StoreResult<()> {
    match op {
        WriteOp::Set {
            collection,
            id,
            data,
        } => {
            let text = encode_checked(&collection, &id, &data)?;
            let next = read_row(conn, &collection, &id)?
                .map(|(v, _)| v + 1)
                .unwrap_or(1);
            conn.execute(
                "INSERT INTO documents (collection, id, version, data) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, id) DO UPDATE SET version = excluded.version, data = excluded.data",
                params![collection, id, next as i64, text],
            )?;
        }
        WriteOp::Update {
            collection,
            id,
            patch,
            expected_version,
        } => {
            let (version, text) = read_row(conn, &collection, &id)?
                .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
            check_version(&collection, &id, expected_version, version)?;

            let mut data: Value = serde_json::from_str(&text)?;
            match &mut data {
                Value::Object(map) => map.extend(patch),
                _ => {
                    return Err(StoreError::Serialization(format!(
                        "{}/{} is not an object",
                        collection, id
                    )))
                }
            }
            let text = encode_checked(&collection, &id, &data)?;
            conn.execute(
                "UPDATE documents SET version = ?3, data = ?4 WHERE collection = ?1 AND id = ?2",
                params![collection, id, (version + 1) as i64, text],
            )?;
        }
        WriteOp::Delete {
            collection,
            id,
            expected_version,
        } => {
            if let Some(expected) = expected_version {
                let Some((version, _)) = read_row(conn, &collection, &id)? else {
                    return Err(StoreError::Conflict(format!(
                        "{}/{} was removed concurrently",
                        collection, id
                    )));
                };
                check_version(&collection, &id, Some(expected), version)?;
            }
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let Some((version, text)) = read_row(conn, &collection, &id)? else {
                return Ok(None);
            };
            Ok(Some(Document {
                id,
                version,
                data: serde_json::from_str(&text)?,
            }))
        })
        .await
    }

    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        let collection = collection.to_string();
        let docs = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, version, data FROM documents WHERE collection = ?1 ORDER BY id",
                )?;
                let rows = stmt.query_map(params![collection], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                })?;
                let mut docs = Vec::new();
                for row in rows {
                    let (id, version, text) = row?;
                    docs.push(Document {
                        id,
                        version: version as u64,
                        data: serde_json::from_str(&text)?,
                    });
                }
                Ok(docs)
            })
            .await?;
        Ok(query.apply(docs))
    }

    async fn count(&self, collection: &str) -> StoreResult<usize> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        // Take the write lock before reading versions.
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for op in batch.into_ops() {
                apply_op(&tx, op)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
