// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for Cardwise.
//!
//! Provides a WAL-mode SQLite `LedgerStore` with embedded migrations. All
//! access is serialized through a single tokio-rusqlite background thread.

pub mod database;
pub mod ledger_store;
pub mod migrations;

pub use database::Database;
pub use ledger_store::SqliteLedgerStore;
