// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Model rows: transactional activation, active-model lookup, and the
//! idempotent anomaly batch insert used by the scoring backfill.

use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::{to_ms, uuid_col, AnomalyScore, NewModel, Store, StoredModel};

fn model_row(row: &Row<'_>) -> rusqlite::Result<StoredModel> {
    let cow_raw: Option<String> = row.get(1)?;
    let cow_id = match cow_raw {
        Some(raw) => Some(Uuid::parse_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(StoredModel {
        model_id: uuid_col(row, 0)?,
        cow_id,
        model_version: row.get(2)?,
        model_data: row.get(3)?,
    })
}

impl Store {
    /// Activate a newly trained model for its (animal, global) partition.
    ///
    /// Prior active models in the partition are deactivated and the new row
    /// inserted active in one transaction, so the one-active-model invariant
    /// holds at every instant.
    pub async fn activate_model(&self, model: NewModel) -> anyhow::Result<()> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            match model.cow_id {
                Some(cow_id) => tx.execute(
                    "UPDATE ml_model SET is_active = 0
                     WHERE cow_id = ?1 AND is_active = 1",
                    params![cow_id.to_string()],
                )?,
                None => tx.execute(
                    "UPDATE ml_model SET is_active = 0
                     WHERE cow_id IS NULL AND is_active = 1",
                    [],
                )?,
            };
            tx.execute(
                "INSERT INTO ml_model
                     (model_id, cow_id, model_version, model_data,
                      training_data_start, training_data_end, metrics, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
                params![
                    model.model_id.to_string(),
                    model.cow_id.map(|id| id.to_string()),
                    model.model_version,
                    model.model_data,
                    to_ms(model.training_data_start),
                    to_ms(model.training_data_end),
                    model.metrics.to_string(),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// The active model for an animal, falling back to the global model.
    pub async fn active_model_for_cow(
        &self,
        cow_id: Uuid,
    ) -> anyhow::Result<Option<StoredModel>> {
        self.call(move |conn| {
            let per_cow = conn
                .query_row(
                    "SELECT model_id, cow_id, model_version, model_data
                     FROM ml_model WHERE cow_id = ?1 AND is_active = 1",
                    params![cow_id.to_string()],
                    model_row,
                )
                .optional()?;
            if per_cow.is_some() {
                return Ok(per_cow);
            }
            let fallback = conn
                .query_row(
                    "SELECT model_id, cow_id, model_version, model_data
                     FROM ml_model WHERE cow_id IS NULL AND is_active = 1",
                    [],
                    model_row,
                )
                .optional()?;
            Ok(fallback)
        })
        .await
    }

    /// Batch-insert anomaly verdicts; `(model, session)` conflicts are
    /// ignored, so re-scoring the same sessions is a no-op.
    pub async fn insert_anomaly_scores(
        &self,
        verdicts: Vec<AnomalyScore>,
    ) -> anyhow::Result<usize> {
        if verdicts.is_empty() {
            return Ok(0);
        }
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0usize;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO anomaly
                         (model_id, session_id, anomaly_score, is_anomaly)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for v in &verdicts {
                    inserted += stmt.execute(params![
                        v.model_id.to_string(),
                        v.session_id.to_string(),
                        v.score,
                        v.is_anomaly,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    /// Count of active models in one (animal, global) partition.
    pub async fn active_model_count(&self, cow_id: Option<Uuid>) -> anyhow::Result<i64> {
        self.call(move |conn| {
            let count = match cow_id {
                Some(cow) => conn.query_row(
                    "SELECT COUNT(*) FROM ml_model WHERE cow_id = ?1 AND is_active = 1",
                    params![cow.to_string()],
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    "SELECT COUNT(*) FROM ml_model WHERE cow_id IS NULL AND is_active = 1",
                    [],
                    |row| row.get(0),
                )?,
            };
            Ok(count)
        })
        .await
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
