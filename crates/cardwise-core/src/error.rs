// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Cardwise token economy.

use thiserror::Error;

/// The primary error type used across the Cardwise economy crates.
///
/// `InsufficientBalance` and `QuotaExhausted` are expected, user-recoverable
/// outcomes. They are produced by the ledger mutators and converted into a
/// structured denial before they reach application callers.
#[derive(Debug, Error)]
pub enum CardwiseError {
    /// Configuration errors (invalid TOML, bad tier table, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// A tier id that is not registered in the catalog.
    #[error("unknown tier `{tier_id}`")]
    UnknownTier { tier_id: String },

    /// A user whose ledger was never opened in this process.
    #[error("unknown user `{user_id}`")]
    UnknownUser { user_id: String },

    /// A generation would exceed the credits available this period.
    #[error("insufficient credits: {required} required, {available} available")]
    InsufficientBalance { required: u32, available: u32 },

    /// The monthly export quota is used up.
    #[error("export quota exhausted: {used} of {quota} used")]
    QuotaExhausted { used: u32, quota: u32 },

    /// The ledger moved between the caller's estimate and the commit.
    #[error("stale snapshot: estimated at version {expected}, ledger is at {actual}")]
    StaleSnapshot { expected: u64, actual: u64 },

    /// The persistence collaborator could not load or save a record.
    #[error("persistence unavailable: {source}")]
    PersistenceUnavailable {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Storage backend errors (database connection, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Remote sync collaborator failure.
    #[error("sync error: {message}")]
    Sync { message: String },

    /// A stored record that violates a ledger invariant.
    #[error("corrupt ledger data: {0}")]
    CorruptLedger(String),

    /// An idempotency key reused for a different kind of action.
    #[error("idempotency key `{key}` was already used for a different action")]
    IdempotencyConflict { key: String },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CardwiseError {
    /// Whether this error is an expected exhaustion outcome rather than a defect.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance { .. } | Self::QuotaExhausted { .. }
        )
    }
}
