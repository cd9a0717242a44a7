// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change notifications broadcast by the economy service.

use cardwise_core::{TierId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::transaction::CommitReceipt;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something that happened to a user's ledger.
///
/// Delivered over a `tokio::sync::broadcast` channel: slow subscribers see
/// `RecvError::Lagged` and lose the oldest events; the ledger never waits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A confirmation mutated the ledger. Replays are not re-announced.
    Committed { receipt: CommitReceipt },
    PeriodReset {
        user_id: UserId,
        period_start: DateTime<Utc>,
        rollover_credits: u32,
    },
    TierChanged {
        user_id: UserId,
        from: TierId,
        to: TierId,
    },
    /// A remote record was merged in.
    Reconciled { user_id: UserId },
    /// A background save attempt failed. Local state is unaffected.
    PersistenceFailed { user_id: UserId, message: String },
    /// Pushing a saved record to the remote failed.
    SyncFailed { user_id: UserId, message: String },
}

impl LedgerEvent {
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::Committed { receipt } => &receipt.user_id,
            Self::PeriodReset { user_id, .. }
            | Self::TierChanged { user_id, .. }
            | Self::Reconciled { user_id }
            | Self::PersistenceFailed { user_id, .. }
            | Self::SyncFailed { user_id, .. } => user_id,
        }
    }
}
