// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Farmers, animals, and RFID ownership windows.
//!
//! The HTTP CRUD surface for these entities lives in the account service;
//! this module carries the gateway operations the pipeline itself needs,
//! above all `resolve_open_tag` (session start) and `assign_tag`, which
//! swaps a tag's open ownership window atomically so the one-open-window
//! invariant can never be observed broken.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::{to_ms, uuid_col, Sex, Store};

impl Store {
    /// Register a farmer account row.
    pub async fn create_farmer(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<Uuid> {
        let farmer_id = Uuid::new_v4();
        let name = name.to_owned();
        let email = email.to_owned();
        let password_hash = password_hash.to_owned();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO farmer (farmer_id, name, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![farmer_id.to_string(), name, email, password_hash, to_ms(Utc::now())],
            )?;
            Ok(farmer_id)
        })
        .await
    }

    /// Register an animal owned by `farmer_id`.
    pub async fn create_cow(
        &self,
        farmer_id: Uuid,
        name: &str,
        sex: Sex,
    ) -> anyhow::Result<Uuid> {
        let cow_id = Uuid::new_v4();
        let name = name.to_owned();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO cow (cow_id, farmer_id, name, sex, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    cow_id.to_string(),
                    farmer_id.to_string(),
                    name,
                    sex.as_str(),
                    to_ms(Utc::now())
                ],
            )?;
            Ok(cow_id)
        })
        .await
    }

    /// Register a tag id if it is not yet known (no-op on conflict).
    pub async fn register_tag(&self, rfid_id: &str) -> anyhow::Result<()> {
        let rfid_id = rfid_id.to_owned();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO rfid_tag (rfid_id, created_at) VALUES (?1, ?2)",
                params![rfid_id, to_ms(Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    /// Assign `rfid_id` to `cow_id` at instant `at`.
    ///
    /// Closes any open ownership window for the tag at the same instant the
    /// new window opens, in one transaction.
    pub async fn assign_tag(
        &self,
        rfid_id: &str,
        cow_id: Uuid,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let rfid_id = rfid_id.to_owned();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE rfid_ownership SET time_end = ?2
                 WHERE rfid_id = ?1 AND time_end IS NULL",
                params![rfid_id, to_ms(at)],
            )?;
            tx.execute(
                "INSERT INTO rfid_ownership (rfid_id, cow_id, time_start, time_end)
                 VALUES (?1, ?2, ?3, NULL)",
                params![rfid_id, cow_id.to_string(), to_ms(at)],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Resolve a tag to the animal holding its open ownership window.
    pub async fn resolve_open_tag(&self, rfid_id: &str) -> anyhow::Result<Option<Uuid>> {
        let rfid_id = rfid_id.to_owned();
        self.call(move |conn| {
            let cow = conn
                .query_row(
                    "SELECT cow_id FROM rfid_ownership
                     WHERE rfid_id = ?1 AND time_end IS NULL",
                    params![rfid_id],
                    |row| uuid_col(row, 0),
                )
                .optional()?;
            Ok(cow)
        })
        .await
    }

    /// Owner of an animal, or `None` when the animal does not exist.
    pub async fn cow_owner(&self, cow_id: Uuid) -> anyhow::Result<Option<Uuid>> {
        self.call(move |conn| {
            let owner = conn
                .query_row(
                    "SELECT farmer_id FROM cow WHERE cow_id = ?1",
                    params![cow_id.to_string()],
                    |row| uuid_col(row, 0),
                )
                .optional()?;
            Ok(owner)
        })
        .await
    }

    /// All animal ids, for the training cycle sweep.
    pub async fn all_cow_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT cow_id FROM cow ORDER BY created_at")?;
            let ids = stmt
                .query_map([], |row| uuid_col(row, 0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }
}

#[cfg(test)]
#[path = "herd_tests.rs"]
mod tests;
