use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use hagglz_core::domain::classification::BillCategory;
use hagglz_core::domain::memory::{MemoryEntryId, MemoryStats, StrategyMemoryEntry};
use hagglz_core::errors::ApplicationError;
use hagglz_core::memory::{rank_candidates, summarize, SimilarEntries, StrategyMemory};

use super::{format_timestamp, parse_timestamp, parse_u32, RepositoryError};
use crate::DbPool;

/// Attempts allowed while the database reports busy or locked.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 16;

const SELECT_ENTRY: &str = "SELECT
        id,
        category,
        company,
        summary,
        embedding_json,
        successes,
        failures,
        version,
        created_at
     FROM strategy_memory_entry";

/// SQLite-backed strategy memory.
///
/// Feedback increments the counters and `version` in one statement, so
/// concurrent writers serialize inside SQLite instead of racing on a read.
/// Similarity ranking happens in process over the candidate rows.
#[derive(Clone)]
pub struct SqlStrategyMemory {
    pool: DbPool,
    max_conflict_retries: u32,
}

impl SqlStrategyMemory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES }
    }

    pub fn with_conflict_retries(mut self, max_conflict_retries: u32) -> Self {
        self.max_conflict_retries = max_conflict_retries;
        self
    }

    pub async fn insert_entry(
        &self,
        entry: &StrategyMemoryEntry,
    ) -> Result<MemoryEntryId, RepositoryError> {
        if entry.embedding.is_empty() {
            return Err(RepositoryError::Decode("embedding must not be empty".to_string()));
        }
        let created_at = format_timestamp(&entry.created_at);

        sqlx::query(
            "INSERT INTO strategy_memory_entry (
                id,
                category,
                company,
                summary,
                embedding_json,
                dimensions,
                successes,
                failures,
                version,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(entry.category.as_str())
        .bind(entry.company.as_deref())
        .bind(&entry.summary)
        .bind(serde_json::to_string(&entry.embedding)?)
        .bind(entry.embedding.len() as i64)
        .bind(i64::from(entry.successes))
        .bind(i64::from(entry.failures))
        .bind(entry.version as i64)
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(entry.id.clone())
    }

    pub async fn find_entry(
        &self,
        id: &MemoryEntryId,
    ) -> Result<Option<StrategyMemoryEntry>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_ENTRY} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(entry_from_row).transpose()
    }

    pub async fn list_entries(
        &self,
        category: Option<BillCategory>,
    ) -> Result<Vec<StrategyMemoryEntry>, RepositoryError> {
        let rows = match category {
            Some(category) => {
                sqlx::query(&format!("{SELECT_ENTRY} WHERE category = ? ORDER BY created_at, id"))
                    .bind(category.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&format!("{SELECT_ENTRY} ORDER BY created_at, id"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(entry_from_row).collect()
    }

    /// Applies one outcome as a single in-place increment. Only a busy or
    /// locked database is retried; the increment itself never races.
    pub async fn apply_feedback(
        &self,
        id: &MemoryEntryId,
        success: bool,
    ) -> Result<StrategyMemoryEntry, RepositoryError> {
        let (success_delta, failure_delta) = if success { (1_i64, 0_i64) } else { (0, 1) };
        let mut attempt = 0;
        loop {
            let result = sqlx::query(
                "UPDATE strategy_memory_entry
                 SET successes = successes + ?,
                     failures = failures + ?,
                     version = version + 1,
                     updated_at = ?
                 WHERE id = ?
                 RETURNING
                     id,
                     category,
                     company,
                     summary,
                     embedding_json,
                     successes,
                     failures,
                     version,
                     created_at",
            )
            .bind(success_delta)
            .bind(failure_delta)
            .bind(format_timestamp(&Utc::now()))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await;

            match result {
                Ok(Some(row)) => return entry_from_row(row),
                Ok(None) => {
                    return Err(RepositoryError::Missing(format!(
                        "strategy memory entry {}",
                        id.0
                    )))
                }
                Err(error) if is_busy(&error) && attempt < self.max_conflict_retries => {
                    tracing::debug!(
                        event_name = "memory.feedback.busy",
                        entry_id = %id.0,
                        attempt,
                        error = %error,
                        "database busy while recording feedback; retrying"
                    );
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                Err(error) if is_busy(&error) => {
                    return Err(RepositoryError::Conflict(format!(
                        "feedback on {} stayed blocked after {} retries: {error}",
                        id.0, self.max_conflict_retries
                    )))
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), including their extended codes.
fn is_busy(error: &sqlx::Error) -> bool {
    let sqlx::Error::Database(database) = error else {
        return false;
    };
    database
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

#[async_trait]
impl StrategyMemory for SqlStrategyMemory {
    async fn insert(&self, entry: StrategyMemoryEntry) -> Result<MemoryEntryId, ApplicationError> {
        self.insert_entry(&entry).await.map_err(RepositoryError::into_memory_store)
    }

    async fn retrieve_similar(
        &self,
        embedding: &[f32],
        category: Option<BillCategory>,
        k: usize,
    ) -> Result<SimilarEntries, ApplicationError> {
        let candidates =
            self.list_entries(category).await.map_err(RepositoryError::into_memory_store)?;
        Ok(rank_candidates(candidates, embedding, category, k))
    }

    async fn record_feedback(
        &self,
        id: &MemoryEntryId,
        success: bool,
    ) -> Result<(), ApplicationError> {
        self.apply_feedback(id, success).await.map(|_| ()).map_err(RepositoryError::into_memory_store)
    }

    async fn get(&self, id: &MemoryEntryId) -> Result<Option<StrategyMemoryEntry>, ApplicationError> {
        self.find_entry(id).await.map_err(RepositoryError::into_memory_store)
    }

    async fn stats(&self) -> Result<MemoryStats, ApplicationError> {
        let entries = self.list_entries(None).await.map_err(RepositoryError::into_memory_store)?;
        Ok(summarize(&entries))
    }
}

fn entry_from_row(row: SqliteRow) -> Result<StrategyMemoryEntry, RepositoryError> {
    let category_raw = row.try_get::<String, _>("category")?;
    let category = BillCategory::parse(&category_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown category `{category_raw}`")))?;
    let embedding: Vec<f32> = serde_json::from_str(&row.try_get::<String, _>("embedding_json")?)?;
    let version = row.try_get::<i64, _>("version")?;

    Ok(StrategyMemoryEntry {
        id: MemoryEntryId(row.try_get("id")?),
        embedding,
        summary: row.try_get("summary")?,
        category,
        company: row.try_get("company")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        successes: parse_u32("successes", row.try_get("successes")?)?,
        failures: parse_u32("failures", row.try_get("failures")?)?,
        version: u64::try_from(version)
            .map_err(|_| RepositoryError::Decode(format!("negative version {version}")))?,
    })
}
