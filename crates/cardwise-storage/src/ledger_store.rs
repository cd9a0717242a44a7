// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the `LedgerStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use tracing::debug;

use cardwise_config::model::StorageConfig;
use cardwise_core::{
    AdapterType, CardwiseError, HealthStatus, LedgerStore, PluginAdapter, TierId, UserEconomy, UserId,
};

use crate::database::{Database, map_tr_err};

/// A `user_economy` row exactly as stored, before validation.
struct StoredRow {
    user_id: String,
    tier_id: String,
    period_start: String,
    credits_used_this_month: i64,
    rollover_credits: i64,
    exports_used_this_month: i64,
    last_synced_at: String,
}

impl StoredRow {
    fn into_economy(self) -> Result<UserEconomy, CardwiseError> {
        Ok(UserEconomy {
            period_start: parse_timestamp(&self.user_id, "period_start", &self.period_start)?,
            last_synced_at: parse_timestamp(&self.user_id, "last_synced_at", &self.last_synced_at)?,
            credits_used_this_month: counter(
                &self.user_id,
                "credits_used_this_month",
                self.credits_used_this_month,
            )?,
            rollover_credits: counter(&self.user_id, "rollover_credits", self.rollover_credits)?,
            exports_used_this_month: counter(
                &self.user_id,
                "exports_used_this_month",
                self.exports_used_this_month,
            )?,
            tier_id: TierId(self.tier_id),
            user_id: UserId(self.user_id),
        })
    }
}

fn parse_timestamp(user: &str, column: &str, raw: &str) -> Result<DateTime<Utc>, CardwiseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CardwiseError::CorruptLedger(format!("{user}: bad {column} `{raw}`: {e}")))
}

fn counter(user: &str, column: &str, value: i64) -> Result<u32, CardwiseError> {
    u32::try_from(value)
        .map_err(|_| CardwiseError::CorruptLedger(format!("{user}: {column} out of range ({value})")))
}

fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed ledger store.
///
/// One row per user in `user_economy`; saves are upserts, so the latest
/// snapshot handed over by the write-behind persister always wins.
pub struct SqliteLedgerStore {
    db: Database,
    path: String,
}

impl SqliteLedgerStore {
    /// Open the store described by `config`, creating and migrating the
    /// database as needed.
    pub async fn open(config: &StorageConfig) -> Result<Self, CardwiseError> {
        let db = Database::open(&config.database_path, config.wal_mode).await?;
        debug!(path = %config.database_path, "SQLite ledger store initialized");
        Ok(Self {
            db,
            path: config.database_path.clone(),
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of stored user records.
    pub async fn count(&self) -> Result<u64, CardwiseError> {
        let n: i64 = self
            .db
            .connection()
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM user_economy", [], |row| row.get(0)))
            .await
            .map_err(map_tr_err)?;
        Ok(n.max(0) as u64)
    }

    /// Flush the WAL before the process exits.
    pub async fn close(&self) -> Result<(), CardwiseError> {
        self.db.checkpoint().await
    }
}

#[async_trait]
impl PluginAdapter for SqliteLedgerStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, CardwiseError> {
        self.db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<UserEconomy>, CardwiseError> {
        let id = user_id.to_string();
        let row = self
            .db
            .connection()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, tier_id, period_start, credits_used_this_month,
                            rollover_credits, exports_used_this_month, last_synced_at
                     FROM user_economy WHERE user_id = ?1",
                )?;
                let result = stmt.query_row(params![id], |row| {
                    Ok(StoredRow {
                        user_id: row.get(0)?,
                        tier_id: row.get(1)?,
                        period_start: row.get(2)?,
                        credits_used_this_month: row.get(3)?,
                        rollover_credits: row.get(4)?,
                        exports_used_this_month: row.get(5)?,
                        last_synced_at: row.get(6)?,
                    })
                });
                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(map_tr_err)?;

        row.map(StoredRow::into_economy).transpose()
    }

    async fn save(&self, economy: &UserEconomy) -> Result<(), CardwiseError> {
        let user_id = economy.user_id.to_string();
        let tier_id = economy.tier_id.to_string();
        let period_start = format_timestamp(&economy.period_start);
        let credits_used = economy.credits_used_this_month;
        let rollover = economy.rollover_credits;
        let exports_used = economy.exports_used_this_month;
        let last_synced_at = format_timestamp(&economy.last_synced_at);
        let updated_at = format_timestamp(&Utc::now());

        self.db
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO user_economy (user_id, tier_id, period_start,
                         credits_used_this_month, rollover_credits, exports_used_this_month,
                         last_synced_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(user_id) DO UPDATE SET
                         tier_id = excluded.tier_id,
                         period_start = excluded.period_start,
                         credits_used_this_month = excluded.credits_used_this_month,
                         rollover_credits = excluded.rollover_credits,
                         exports_used_this_month = excluded.exports_used_this_month,
                         last_synced_at = excluded.last_synced_at,
                         updated_at = excluded.updated_at",
                    params![
                        user_id,
                        tier_id,
                        period_start,
                        credits_used,
                        rollover,
                        exports_used,
                        last_synced_at,
                        updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }
}
