// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote source-of-truth contract.

use async_trait::async_trait;

use crate::error::CardwiseError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{UserEconomy, UserId};

/// A server-side copy of the ledger.
///
/// The local ledger stays the authority for enforcement; remote snapshots are
/// folded in conservatively and local changes are pushed after they commit.
#[async_trait]
pub trait RemoteSync: PluginAdapter {
    /// Fetches the server-authoritative snapshot for a user.
    async fn fetch(&self, user_id: &UserId) -> Result<Option<UserEconomy>, CardwiseError>;

    /// Pushes a locally committed snapshot.
    async fn push(&self, economy: &UserEconomy) -> Result<(), CardwiseError>;
}
