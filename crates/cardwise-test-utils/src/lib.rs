// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Cardwise integration tests.
//!
//! Provides mock collaborators and a test harness for fast, deterministic
//! tests without a database or network.
//!
//! # Components
//!
//! - [`MockLedgerStore`] - In-memory `LedgerStore` with save counting and failure injection
//! - [`MockRemoteSync`] - Scriptable remote source of truth capturing pushes
//! - [`TestHarness`] - `EconomyService` wired to the mocks and a manual clock

pub mod harness;
pub mod mock_store;
pub mod mock_sync;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_store::MockLedgerStore;
pub use mock_sync::MockRemoteSync;
