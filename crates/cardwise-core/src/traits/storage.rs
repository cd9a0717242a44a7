// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence contract for per-user ledgers.

use async_trait::async_trait;

use crate::error::CardwiseError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{UserEconomy, UserId};

/// Durable home of [`UserEconomy`] records.
///
/// Called when a user's ledger is first opened and, write-behind, after each
/// successful in-memory mutation. Failures are never fatal to enforcement.
#[async_trait]
pub trait LedgerStore: PluginAdapter {
    /// Loads the stored record for a user, if one exists.
    async fn load(&self, user_id: &UserId) -> Result<Option<UserEconomy>, CardwiseError>;

    /// Inserts or replaces the record for `economy.user_id`.
    async fn save(&self, economy: &UserEconomy) -> Result<(), CardwiseError>;
}
