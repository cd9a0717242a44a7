// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Cardwise token economy.
//!
//! This crate provides the error type, the per-user ledger record, and the
//! collaborator traits (persistence and remote sync) that the economy engine
//! consumes. Storage and sync backends implement traits defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::CardwiseError;
pub use types::{
    AdapterType, HealthStatus, IdempotencyKey, Tier, TierId, UserEconomy, UserId,
};

pub use traits::{LedgerStore, PluginAdapter, RemoteSync};
