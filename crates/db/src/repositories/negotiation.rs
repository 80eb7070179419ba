use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use hagglz_core::domain::negotiation::{
    ExecutionRecord, NegotiationId, NegotiationState, StateTransition,
};
use hagglz_core::errors::ApplicationError;
use hagglz_core::records::{NegotiationRepository, NegotiationSummary};

use super::{format_timestamp, parse_timestamp, parse_u32, RepositoryError};
use crate::DbPool;

/// Stores each `ExecutionRecord` as a JSON snapshot plus queryable columns,
/// and mirrors its transitions into the append-only
/// `negotiation_transition` table.
#[derive(Clone)]
pub struct SqlNegotiationRepository {
    pool: DbPool,
}

impl SqlNegotiationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_record(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let record_json = serde_json::to_string(record)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO negotiation (
                id,
                user_id,
                state,
                category,
                execution_mode,
                blended_confidence,
                memory_entry_id,
                record_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                category = excluded.category,
                execution_mode = excluded.execution_mode,
                blended_confidence = excluded.blended_confidence,
                memory_entry_id = excluded.memory_entry_id,
                record_json = excluded.record_json,
                updated_at = excluded.updated_at",
        )
        .bind(&record.id.0)
        .bind(record.bill.user_id.as_deref())
        .bind(record.state.as_str())
        .bind(record.classification.as_ref().map(|c| c.category.as_str()))
        .bind(record.execution_mode.map(|mode| mode.as_str()))
        .bind(record.blended_confidence)
        .bind(record.memory_entry_id.as_ref().map(|id| id.0.as_str()))
        .bind(&record_json)
        .bind(format_timestamp(&record.created_at))
        .bind(format_timestamp(&record.updated_at))
        .execute(&mut *tx)
        .await?;

        for transition in &record.transitions {
            sqlx::query(
                "INSERT OR IGNORE INTO negotiation_transition (
                    negotiation_id,
                    sequence,
                    from_state,
                    to_state,
                    event,
                    reason,
                    occurred_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.id.0)
            .bind(i64::from(transition.sequence))
            .bind(transition.from.map(|state| state.as_str()))
            .bind(transition.to.as_str())
            .bind(&transition.event)
            .bind(transition.reason.as_deref())
            .bind(format_timestamp(&transition.occurred_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn find_record(
        &self,
        id: &NegotiationId,
    ) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let row = sqlx::query("SELECT record_json FROM negotiation WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(record_from_row).transpose()
    }

    pub async fn list_records_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record_json FROM negotiation
             WHERE user_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    pub async fn list_transitions(
        &self,
        id: &NegotiationId,
    ) -> Result<Vec<StateTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT sequence, from_state, to_state, event, reason, occurred_at
             FROM negotiation_transition
             WHERE negotiation_id = ?
             ORDER BY sequence ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }

    /// Aggregates in SQL. Only the savings amounts are read back so they
    /// can be summed as decimals.
    pub async fn summarize(&self) -> Result<NegotiationSummary, RepositoryError> {
        let mut summary = NegotiationSummary::empty();

        let rows = sqlx::query("SELECT state, COUNT(*) AS total FROM negotiation GROUP BY state")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let state: String = row.try_get("state")?;
            let total = parse_count("total", row.try_get("total")?)?;
            summary.add_state(&state, total);
        }

        let row = sqlx::query(
            "SELECT
                COUNT(*) AS recorded,
                COALESCE(SUM(json_extract(record_json, '$.outcome.success')), 0) AS successful
             FROM negotiation
             WHERE json_extract(record_json, '$.outcome.success') IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        summary.add_outcomes(
            parse_count("recorded", row.try_get("recorded")?)?,
            parse_count("successful", row.try_get("successful")?)?,
        );

        let savings = sqlx::query_scalar::<_, String>(
            "SELECT CAST(json_extract(record_json, '$.outcome.savings_amount') AS TEXT)
             FROM negotiation
             WHERE json_extract(record_json, '$.outcome.savings_amount') IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        for amount in savings {
            summary.total_savings += Decimal::from_str(&amount).map_err(|error| {
                RepositoryError::Decode(format!("invalid savings amount `{amount}` ({error})"))
            })?;
        }

        Ok(summary)
    }
}

#[async_trait]
impl NegotiationRepository for SqlNegotiationRepository {
    async fn save(&self, record: &ExecutionRecord) -> Result<(), ApplicationError> {
        self.save_record(record).await.map_err(RepositoryError::into_persistence)
    }

    async fn find(&self, id: &NegotiationId) -> Result<Option<ExecutionRecord>, ApplicationError> {
        self.find_record(id).await.map_err(RepositoryError::into_persistence)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ApplicationError> {
        self.list_records_for_user(user_id, limit).await.map_err(RepositoryError::into_persistence)
    }

    async fn summary(&self) -> Result<NegotiationSummary, ApplicationError> {
        self.summarize().await.map_err(RepositoryError::into_persistence)
    }
}

fn parse_count(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("negative count in `{column}`: {value}")))
}

fn record_from_row(row: SqliteRow) -> Result<ExecutionRecord, RepositoryError> {
    let json = row.try_get::<String, _>("record_json")?;
    Ok(serde_json::from_str(&json)?)
}

fn transition_from_row(row: SqliteRow) -> Result<StateTransition, RepositoryError> {
    let from = row
        .try_get::<Option<String>, _>("from_state")?
        .map(|value| {
            NegotiationState::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown from_state `{value}`")))
        })
        .transpose()?;
    let to_raw = row.try_get::<String, _>("to_state")?;
    let to = NegotiationState::parse(&to_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown to_state `{to_raw}`")))?;

    Ok(StateTransition {
        sequence: parse_u32("sequence", row.try_get("sequence")?)?,
        from,
        to,
        event: row.try_get("event")?,
        reason: row.try_get("reason")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
